/// Errors reported by spool, sequence and lock operations.
///
/// Contention on a lock is not an error: see [`crate::lock::LockAttempt`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unexpected filesystem failure
    #[error("{operation} {path:?}: {source}")]
    Io {
        operation: &'static str,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Lock file exists but does not hold a usable process id
    #[error("corrupt lock file {path:?} ({len} bytes)")]
    CorruptLock { path: std::path::PathBuf, len: usize },
    #[error("{0}: bad job id")]
    BadJobId(String),
    #[error("unrecognized file name {0:?}")]
    UnrecognizedFileName(String),
    #[error("bad system name {0:?}")]
    BadSystemName(String),
    /// A retry loop saw the termination signal
    #[error("interrupted while waiting for {0:?}")]
    Interrupted(std::path::PathBuf),
}

impl Error {
    pub fn io(
        operation: &'static str,
        path: impl Into<std::path::PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Error::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Malformed input that was rejected without side effects
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Error::BadJobId(_) | Error::UnrecognizedFileName(_) | Error::BadSystemName(_)
        )
    }
}
