//! Lock files shared between cooperating processes
//!
//! A lock is a file whose content is the process id of its holder. Acquisition writes the pid
//! into a private temporary file next to the lock and hard-links it into place, so creating
//! the lock and filling it in happen in one atomic step. No kernel advisory locking is used.
//!
//! When the link fails because the lock exists, the recorded holder is checked:
//!
//! - our own pid means an earlier link really succeeded (seen on some network filesystems);
//! - a live holder means the lock is busy;
//! - an empty file or a dead holder means the lock is stale. We write our pid into it, wait
//!   (five seconds by default), and keep the lock only if our pid is still there and the path
//!   still names the file we opened. A competitor that read the file before our write gets
//!   that window to overwrite it; if it needs longer, both sides believe they hold the lock.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::config::LockFormat;
use crate::context::Context;
use crate::error::Error;
use crate::path::join2;

const LOCK_FILE_MODE: u32 = 0o644;
const MAX_LOCK_CONTENT: u64 = 64;

/// Where a lock name is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Relative to the spool directory
    Spool,
    /// Relative to the lock directory
    LockDir,
}

/// Ownership of one lock file.
///
/// The lock stays on disk until [`LockHandle::release`] (or [`unlock`]) removes it; a process
/// that exits without releasing leaves a stale lock for the next acquirer to reclaim.
#[derive(Debug)]
#[must_use = "the lock stays held until released"]
pub struct LockHandle {
    path: PathBuf,
    pid: u32,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub async fn release(self) -> Result<(), Error> {
        unlock_at(&self.path).await
    }
}

/// Outcome of a lock attempt that did not hit a hard error
#[derive(Debug)]
pub enum LockAttempt {
    Held(LockHandle),
    /// Another live process holds the lock
    Busy { holder: u32 },
}

impl LockAttempt {
    pub fn is_held(&self) -> bool {
        matches!(self, LockAttempt::Held(_))
    }

    pub fn into_handle(self) -> Option<LockHandle> {
        match self {
            LockAttempt::Held(handle) => Some(handle),
            LockAttempt::Busy { .. } => None,
        }
    }
}

pub fn lock_path(ctx: &Context, name: &str, scope: LockScope) -> PathBuf {
    match scope {
        LockScope::Spool => join2(ctx.spool_dir(), name),
        LockScope::LockDir => join2(ctx.lock_dir(), name),
    }
}

fn temp_path(lock: &Path, pid: u32) -> PathBuf {
    let name = format!("TMP{pid:010x}");
    match lock.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => join2(parent, name),
        _ => PathBuf::from(name),
    }
}

pub fn encode_pid(format: LockFormat, pid: u32) -> Vec<u8> {
    match format {
        LockFormat::Ascii => format!("{pid:10}\n").into_bytes(),
        LockFormat::Binary => (pid as i32).to_ne_bytes().to_vec(),
    }
}

/// Parse the holder recorded in a lock file; `None` for an empty file.
pub fn decode_pid(format: LockFormat, contents: &[u8], path: &Path) -> Result<Option<u32>, Error> {
    if contents.is_empty() {
        return Ok(None);
    }
    let corrupt = || Error::CorruptLock {
        path: path.to_owned(),
        len: contents.len(),
    };
    let pid = match format {
        LockFormat::Ascii => {
            // same leniency as strtol: leading blanks, digits, then anything
            let text = contents.trim_ascii_start();
            let digits = text.iter().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 {
                return Err(corrupt());
            }
            std::str::from_utf8(&text[..digits])
                .ok()
                .and_then(|s| s.parse::<i32>().ok())
                .ok_or_else(corrupt)?
        }
        LockFormat::Binary => {
            let bytes: [u8; 4] = contents
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(corrupt)?;
            i32::from_ne_bytes(bytes)
        }
    };
    if pid <= 0 {
        return Err(corrupt());
    }
    Ok(Some(pid as u32))
}

async fn create_temp(temp: &Path, contents: &[u8]) -> Result<(), Error> {
    let mut made_dirs = false;
    loop {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(LOCK_FILE_MODE)
            .open(temp)
            .await
        {
            Ok(mut file) => {
                file.write_all(contents)
                    .await
                    .map_err(|err| Error::io("write", temp, err))?;
                file.flush()
                    .await
                    .map_err(|err| Error::io("write", temp, err))?;
                return Ok(());
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !made_dirs => {
                made_dirs = true;
                if let Some(parent) = temp.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|err| Error::io("mkdir", parent, err))?;
                }
            }
            Err(err) => return Err(Error::io("create", temp, err)),
        }
    }
}

async fn read_holder(
    file: &mut tokio::fs::File,
    format: LockFormat,
    path: &Path,
) -> Result<Option<u32>, Error> {
    file.seek(std::io::SeekFrom::Start(0))
        .await
        .map_err(|err| Error::io("lseek", path, err))?;
    let mut contents = Vec::new();
    (&mut *file)
        .take(MAX_LOCK_CONTENT)
        .read_to_end(&mut contents)
        .await
        .map_err(|err| Error::io("read", path, err))?;
    decode_pid(format, &contents, path)
}

fn modified_time(metadata: &std::fs::Metadata) -> String {
    match metadata.modified() {
        Ok(time) => chrono::DateTime::<chrono::Local>::from(time)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        Err(_) => "unknown".to_string(),
    }
}

async fn link_until_decided(
    ctx: &Context,
    temp: &Path,
    path: &Path,
    our_pid: &[u8],
) -> Result<LockAttempt, Error> {
    let format = ctx.config().lock_format;
    let held = || {
        LockAttempt::Held(LockHandle {
            path: path.to_owned(),
            pid: ctx.pid(),
        })
    };
    loop {
        match tokio::fs::hard_link(temp, path).await {
            Ok(()) => return Ok(held()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                tracing::error!("link ({:?}, {:?}): {}", temp, path, err);
                return Err(Error::io("link", path, err));
            }
        }
        let (mut file, writable) = match tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
        {
            Ok(file) => (file, true),
            // removed since the link failed, try again
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                match tokio::fs::File::open(path).await {
                    Ok(file) => (file, false),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(Error::io("open", path, err)),
                }
            }
            Err(err) => return Err(Error::io("open", path, err)),
        };
        let holder = read_holder(&mut file, format, path).await?;
        match holder {
            Some(pid) if pid == ctx.pid() => {
                tracing::debug!("lock {:?} already records our pid {}", path, pid);
                return Ok(held());
            }
            Some(pid) if ctx.is_alive(pid) => {
                tracing::debug!("lock {:?} held by process {}", path, pid);
                return Ok(LockAttempt::Busy { holder: pid });
            }
            _ => {}
        }
        let metadata = file
            .metadata()
            .await
            .map_err(|err| Error::io("fstat", path, err))?;
        match holder {
            Some(pid) => tracing::error!(
                "found stale lock {:?} held by process {} (modified {})",
                path,
                pid,
                modified_time(&metadata)
            ),
            None => tracing::error!(
                "found empty lock file {:?} (modified {})",
                path,
                modified_time(&metadata)
            ),
        }
        if !writable {
            drop(file);
            if let Err(err) = tokio::fs::remove_file(path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!("remove ({:?}): {}", path, err);
                    return Err(Error::io("remove", path, err));
                }
            }
            continue;
        }
        // claim the stale lock in place; removing it would race with other reclaimers
        file.seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|err| Error::io("lseek", path, err))?;
        file.write_all(our_pid)
            .await
            .map_err(|err| Error::io("write", path, err))?;
        file.flush()
            .await
            .map_err(|err| Error::io("write", path, err))?;
        tokio::time::sleep(ctx.config().stale_lock_wait).await;
        if read_holder(&mut file, format, path).await? != Some(ctx.pid()) {
            tracing::debug!("lost stale lock {:?} to another process", path);
            continue;
        }
        let on_disk = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(Error::io("stat", path, err)),
        };
        let opened = file
            .metadata()
            .await
            .map_err(|err| Error::io("fstat", path, err))?;
        if on_disk.dev() == opened.dev() && on_disk.ino() == opened.ino() {
            tracing::info!("reclaimed stale lock {:?}", path);
            return Ok(held());
        }
        tracing::debug!("lock {:?} was replaced while we claimed it", path);
    }
}

/// Try once to take the lock file at `path`.
///
/// Returns `Busy` when a live process holds it and an error only for unexpected failures.
#[instrument(skip(ctx), fields(pid = ctx.pid()))]
pub async fn lock_at(ctx: &Context, path: &Path) -> Result<LockAttempt, Error> {
    let temp = temp_path(path, ctx.pid());
    let our_pid = encode_pid(ctx.config().lock_format, ctx.pid());
    let result = match create_temp(&temp, &our_pid).await {
        Ok(()) => link_until_decided(ctx, &temp, path, &our_pid).await,
        Err(err) => Err(err),
    };
    if let Err(err) = tokio::fs::remove_file(&temp).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::error!("remove ({:?}): {}", temp, err);
        }
    }
    result
}

pub async fn lock(ctx: &Context, name: &str, scope: LockScope) -> Result<LockAttempt, Error> {
    lock_at(ctx, &lock_path(ctx, name, scope)).await
}

/// Keep trying to take a lock while it is busy, sleeping between attempts.
///
/// Gives up with [`Error::Interrupted`] once a termination signal has been received.
pub async fn lock_wait(ctx: &Context, name: &str, scope: LockScope) -> Result<LockHandle, Error> {
    let path = lock_path(ctx, name, scope);
    loop {
        if ctx.was_interrupted() {
            return Err(Error::Interrupted(path));
        }
        match lock_at(ctx, &path).await? {
            LockAttempt::Held(handle) => return Ok(handle),
            LockAttempt::Busy { holder } => {
                tracing::debug!("waiting for {:?} held by process {}", path, holder);
                if !ctx.sleep(ctx.config().retry_interval).await {
                    return Err(Error::Interrupted(path));
                }
            }
        }
    }
}

/// Remove a lock file; a lock that is already gone counts as released.
pub async fn unlock_at(path: &Path) -> Result<(), Error> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            tracing::error!("remove ({:?}): {}", path, err);
            Err(Error::io("remove", path, err))
        }
    }
}

pub async fn unlock(ctx: &Context, name: &str, scope: LockScope) -> Result<(), Error> {
    unlock_at(&lock_path(ctx, name, scope)).await
}
