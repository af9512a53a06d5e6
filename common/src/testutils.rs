use std::collections::HashSet;

use crate::config::{SpoolConfig, SpoolLayout};
use crate::context::Context;
use crate::liveness::ProcessLiveness;

pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("uuspool_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

/// Scratch spool and lock directories with short lock timings.
///
/// tmp
/// |- spool
/// |- locks
pub async fn setup_context(layout: SpoolLayout) -> anyhow::Result<(std::path::PathBuf, Context)> {
    let tmp_dir = create_temp_dir().await?;
    tokio::fs::create_dir(tmp_dir.join("spool")).await?;
    tokio::fs::create_dir(tmp_dir.join("locks")).await?;
    let mut config = SpoolConfig::new(
        tmp_dir.join("spool"),
        tmp_dir.join("locks"),
        "local7",
        layout,
    );
    config.stale_lock_wait = std::time::Duration::from_millis(50);
    config.retry_interval = std::time::Duration::from_millis(10);
    Ok((tmp_dir, Context::new(config)))
}

/// Liveness oracle for tests: only the listed pids are running.
#[derive(Debug, Default)]
pub struct FakeLiveness {
    alive: std::sync::Mutex<HashSet<u32>>,
}

impl FakeLiveness {
    pub fn with_alive(pids: &[u32]) -> Self {
        Self {
            alive: std::sync::Mutex::new(pids.iter().copied().collect()),
        }
    }
}

impl ProcessLiveness for FakeLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}
