use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::config::SpoolLayout;
use crate::context::Context;
use crate::error::Error;
use crate::lock::{lock, unlock, LockAttempt, LockScope};
use crate::path::{check_system_name, join2, truncated};

const SYSTEM_LOCK_CHARS: usize = 8;
const DEVICE_DIR: &str = "/dev";

/// `LCK..<system>`, with the system name cut to eight characters.
pub fn system_lock_name(system: &str) -> String {
    format!("LCK..{}", truncated(system, Some(SYSTEM_LOCK_CHARS)))
}

/// Lock the conversation with `system`.
#[instrument(skip(ctx))]
pub async fn lock_system(ctx: &Context, system: &str) -> Result<LockAttempt, Error> {
    check_system_name(system)?;
    lock(ctx, &system_lock_name(system), LockScope::LockDir).await
}

pub async fn unlock_system(ctx: &Context, system: &str) -> Result<(), Error> {
    check_system_name(system)?;
    unlock(ctx, &system_lock_name(system), LockScope::LockDir).await
}

fn device_path(device: &Path) -> PathBuf {
    if device.is_absolute() {
        device.to_owned()
    } else {
        join2(DEVICE_DIR, device)
    }
}

/// Lock file name for a port device.
///
/// SVR4 names the lock after the device numbers (`LK.<fs major>.<major>.<minor>`), so
/// different names for one device share a lock; everything else uses the device base name.
pub async fn port_lock_name(ctx: &Context, device: &Path) -> Result<String, Error> {
    if ctx.layout() == SpoolLayout::Svr4 {
        let path = device_path(device);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| Error::io("stat", &path, err))?;
        return Ok(format!(
            "LK.{:03}.{:03}.{:03}",
            nix::sys::stat::major(metadata.dev() as _),
            nix::sys::stat::major(metadata.rdev() as _),
            nix::sys::stat::minor(metadata.rdev() as _)
        ));
    }
    let base = device
        .file_name()
        .ok_or_else(|| Error::UnrecognizedFileName(device.to_string_lossy().into_owned()))?;
    Ok(format!("LCK..{}", base.to_string_lossy()))
}

/// Lock the port on `device` (`ttyS0` or `/dev/ttyS0`).
#[instrument(skip(ctx))]
pub async fn lock_port(ctx: &Context, device: &Path) -> Result<LockAttempt, Error> {
    let name = port_lock_name(ctx, device).await?;
    lock(ctx, &name, LockScope::LockDir).await
}

pub async fn unlock_port(ctx: &Context, device: &Path) -> Result<(), Error> {
    let name = port_lock_name(ctx, device).await?;
    unlock(ctx, &name, LockScope::LockDir).await
}
