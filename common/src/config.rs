//! Configuration types for spool layout, lock files and execution settings

/// Directory layout convention used for the spool tree.
///
/// Selected once per process; every path or name produced by this crate follows exactly one
/// layout.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum, serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SpoolLayout {
    /// Version 2: everything in the spool root
    V2,
    /// 4.2BSD: `C.`, `D.` and `X.` subdirectories
    Bsd42,
    /// 4.3BSD: like 4.2BSD plus `D.<local>` and `D.<local>X` for locally created data
    Bsd43,
    /// HoneyDanBer: one directory per remote system
    Hdb,
    /// System V Release 4: per system directories with per grade subdirectories
    Svr4,
    /// Ultrix: `sys/<system>` trees with a `sys/DEFAULT` fallback
    Ultrix,
    /// Taylor UUCP: `<system>/C.`, `<system>/D.`, `<system>/D.X` and `<system>/X.`
    #[default]
    Taylor,
}

impl SpoolLayout {
    pub const ALL: [SpoolLayout; 7] = [
        SpoolLayout::V2,
        SpoolLayout::Bsd42,
        SpoolLayout::Bsd43,
        SpoolLayout::Hdb,
        SpoolLayout::Svr4,
        SpoolLayout::Ultrix,
        SpoolLayout::Taylor,
    ];

    /// Maximum number of system name characters embedded in spool file names.
    ///
    /// `None` means the layout does not embed the system name in command file names at all
    /// (it relies on directory placement instead).
    pub fn max_system_len(self) -> Option<usize> {
        match self {
            SpoolLayout::V2
            | SpoolLayout::Bsd42
            | SpoolLayout::Bsd43
            | SpoolLayout::Hdb
            | SpoolLayout::Svr4 => Some(7),
            SpoolLayout::Ultrix => Some(14),
            SpoolLayout::Taylor => None,
        }
    }
}

impl std::fmt::Display for SpoolLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            SpoolLayout::V2 => "v2",
            SpoolLayout::Bsd42 => "bsd42",
            SpoolLayout::Bsd43 => "bsd43",
            SpoolLayout::Hdb => "hdb",
            SpoolLayout::Svr4 => "svr4",
            SpoolLayout::Ultrix => "ultrix",
            SpoolLayout::Taylor => "taylor",
        };
        write!(f, "{name}")
    }
}

/// On-disk encoding of the process id stored in a lock file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFormat {
    /// HDB style: pid right-justified in ten columns followed by a newline
    Ascii,
    /// V2 style: the raw native-endian `int`
    Binary,
}

impl LockFormat {
    pub fn for_layout(layout: SpoolLayout) -> Self {
        match layout {
            SpoolLayout::V2 => LockFormat::Binary,
            _ => LockFormat::Ascii,
        }
    }
}

pub const DEFAULT_STALE_LOCK_WAIT: std::time::Duration = std::time::Duration::from_secs(5);
pub const DEFAULT_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Spool and lock directory settings shared by every operation
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Root of the spool tree
    pub spool_dir: std::path::PathBuf,
    /// Directory holding system and port lock files
    pub lock_dir: std::path::PathBuf,
    /// Name of the local system
    pub local_name: String,
    pub layout: SpoolLayout,
    pub lock_format: LockFormat,
    /// How long a stale lock claim must survive before it is trusted
    pub stale_lock_wait: std::time::Duration,
    /// Delay between attempts while a lock is held by a live process
    pub retry_interval: std::time::Duration,
}

impl SpoolConfig {
    pub fn new(
        spool_dir: impl Into<std::path::PathBuf>,
        lock_dir: impl Into<std::path::PathBuf>,
        local_name: impl Into<String>,
        layout: SpoolLayout,
    ) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            lock_dir: lock_dir.into(),
            local_name: local_name.into(),
            layout,
            lock_format: LockFormat::for_layout(layout),
            stale_lock_wait: DEFAULT_STALE_LOCK_WAIT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.local_name.is_empty() {
            return Err("local system name must not be empty".to_string());
        }
        if self.local_name.contains('/') {
            return Err(format!(
                "local system name {:?} must not contain '/'",
                self.local_name
            ));
        }
        if self.stale_lock_wait.is_zero() || self.retry_interval.is_zero() {
            return Err("lock wait intervals must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Runtime configuration for tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
}
