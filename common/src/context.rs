use std::sync::Arc;

use crate::config::{SpoolConfig, SpoolLayout};
use crate::liveness::{ProcessLiveness, SignalLiveness};

/// Everything a spool operation needs to know about the process running it.
///
/// Replaces the process-wide spool directory, lock directory and local name globals. The
/// cancellation token doubles as the "termination signal received" flag checked by retry
/// loops.
#[derive(Debug, Clone)]
pub struct Context {
    config: SpoolConfig,
    pid: u32,
    liveness: Arc<dyn ProcessLiveness>,
    cancel: tokio_util::sync::CancellationToken,
}

impl Context {
    pub fn new(config: SpoolConfig) -> Self {
        Self {
            config,
            pid: std::process::id(),
            liveness: Arc::new(SignalLiveness),
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Act on behalf of a different process id (written into lock files).
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    #[must_use]
    pub fn with_liveness(mut self, liveness: Arc<dyn ProcessLiveness>) -> Self {
        self.liveness = liveness;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: tokio_util::sync::CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub fn layout(&self) -> SpoolLayout {
        self.config.layout
    }

    pub fn spool_dir(&self) -> &std::path::Path {
        &self.config.spool_dir
    }

    pub fn lock_dir(&self) -> &std::path::Path {
        &self.config.lock_dir
    }

    pub fn local_name(&self) -> &str {
        &self.config.local_name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.liveness.is_alive(pid)
    }

    pub fn was_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &tokio_util::sync::CancellationToken {
        &self.cancel
    }

    /// Sleep for `duration` unless a termination signal arrives first.
    ///
    /// Returns `false` when interrupted.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}
