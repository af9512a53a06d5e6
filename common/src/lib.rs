//! UUCP spool tree naming, sequence numbers and lock files
//!
//! Every operation takes a [`Context`] carrying the spool and lock directories, the local
//! system name, the selected [`SpoolLayout`] and the "termination signal received" flag.
//!
//! Cooperating processes synchronize only through lock files (see [`lock`]); sequence
//! numbers ([`seq`]) and generated file names ([`name`]) build on them.

pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod jobid;
pub mod liveness;
pub mod locate;
pub mod lock;
pub mod name;
pub mod path;
pub mod resource;
pub mod scan;
pub mod seq;
pub mod uuxqt;

#[cfg(test)]
pub mod testutils;

pub use config::{LockFormat, OutputConfig, RuntimeConfig, SpoolConfig, SpoolLayout};
pub use context::Context;
pub use error::Error;
pub use locate::{locate, FileKind};
pub use lock::{LockAttempt, LockHandle, LockScope};

fn init_tracing(output: &OutputConfig) {
    if output.quiet {
        return;
    }
    let level = match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `cancel` on SIGINT, SIGTERM or SIGHUP.
fn watch_signals(cancel: tokio_util::sync::CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
        };
        tracing::warn!("received {}, giving up on pending lock waits", name);
        cancel.cancel();
    });
    Ok(())
}

/// Set up logging and a tokio runtime, then run `func` to completion.
///
/// `func` receives the token cancelled by termination signals; pass it to
/// [`Context::with_cancellation`]. Returns `None` (after logging the error) if `func` failed.
pub fn run<Fut, T>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce(tokio_util::sync::CancellationToken) -> Fut,
) -> Option<T>
where
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to start tokio runtime: {}", &error);
            return None;
        }
    };
    let cancel = tokio_util::sync::CancellationToken::new();
    runtime.block_on(async move {
        if let Err(error) = watch_signals(cancel.clone()) {
            tracing::error!("failed to install signal handlers: {}", &error);
            return None;
        }
        match func(cancel).await {
            Ok(result) => Some(result),
            Err(error) => {
                tracing::error!("{:#}", &error);
                None
            }
        }
    })
}
