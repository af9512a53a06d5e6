use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::context::Context;
use crate::error::Error;
use crate::lock::{lock, lock_at, unlock_at, LockAttempt, LockHandle, LockScope};
use crate::path::{join2, prefixed_sibling};

const SLOT_LOCK_PREFIX: &str = "LCK.XQT.";
const COMMAND_LOCK_PREFIX: &str = "LXQ.";
const COMMAND_LOCK_CHARS: usize = 9;
const EXECUTION_DIR: &str = ".Xqtdir";
const EXECUTION_DIR_MODE: u32 = 0o700;

/// Slot count used when no usable maximum is configured
pub const UNLIMITED_SLOTS: usize = 9999;

/// Number of slots to probe for a configured maximum; 0 and values from 10000 up mean no limit.
pub fn effective_slots(max_slots: usize) -> usize {
    if max_slots == 0 || max_slots > UNLIMITED_SLOTS {
        UNLIMITED_SLOTS
    } else {
        max_slots
    }
}

/// Lock file name serializing all executions of `command`.
///
/// Uses the first word of the command line with slashes removed, cut to nine characters.
pub fn command_lock_name(command: &str) -> String {
    let word: String = command
        .chars()
        .take_while(|c| !matches!(c, ' ' | '\t'))
        .filter(|c| *c != '/')
        .take(COMMAND_LOCK_CHARS)
        .collect();
    format!("{COMMAND_LOCK_PREFIX}{word}")
}

/// One held executor slot, optionally together with a command type lock.
#[derive(Debug)]
#[must_use = "the slot stays taken until released"]
pub struct ExecutorSlot {
    index: usize,
    slot: LockHandle,
    command: Option<LockHandle>,
}

impl ExecutorSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of the command type lock held with this slot, if any.
    pub fn command_lock(&self) -> Option<&Path> {
        self.command.as_ref().map(LockHandle::path)
    }

    /// Also lock the command type of `command`.
    ///
    /// If another executor is running the same command, or locking fails, the slot itself is
    /// released so no slot is left taken without work.
    #[instrument(skip(self, ctx), fields(slot = self.index))]
    pub async fn lock_command(
        mut self,
        ctx: &Context,
        command: &str,
    ) -> Result<Option<ExecutorSlot>, Error> {
        let name = command_lock_name(command);
        match lock(ctx, &name, LockScope::Spool).await {
            Ok(LockAttempt::Held(handle)) => {
                if let Some(previous) = self.command.replace(handle) {
                    previous.release().await?;
                }
                Ok(Some(self))
            }
            Ok(LockAttempt::Busy { holder }) => {
                tracing::debug!("command {:?} is being run by process {}", name, holder);
                self.release().await?;
                Ok(None)
            }
            Err(err) => {
                if let Err(release_err) = self.release().await {
                    tracing::error!("releasing slot after failed command lock: {}", release_err);
                }
                Err(err)
            }
        }
    }

    /// Release the command type lock (if held) and the slot.
    pub async fn release(self) -> Result<(), Error> {
        let command = match self.command {
            Some(handle) => handle.release().await,
            None => Ok(()),
        };
        let slot = self.slot.release().await;
        command.and(slot)
    }
}

/// Take the first free slot among `max_slots`, or `None` if all are busy.
#[instrument(skip(ctx))]
pub async fn acquire_executor_slot(
    ctx: &Context,
    max_slots: usize,
) -> Result<Option<ExecutorSlot>, Error> {
    for index in 0..effective_slots(max_slots) {
        let name = format!("{SLOT_LOCK_PREFIX}{index}");
        match lock(ctx, &name, LockScope::Spool).await? {
            LockAttempt::Held(slot) => {
                tracing::debug!("took executor slot {}", index);
                return Ok(Some(ExecutorSlot {
                    index,
                    slot,
                    command: None,
                }));
            }
            LockAttempt::Busy { .. } => {}
        }
    }
    tracing::info!("all {} executor slots are busy", effective_slots(max_slots));
    Ok(None)
}

/// Whether some executor currently holds the command type lock for `command`.
pub async fn is_command_locked(ctx: &Context, command: &str) -> Result<bool, Error> {
    let path = join2(ctx.spool_dir(), command_lock_name(command));
    match tokio::fs::symlink_metadata(&path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::io("stat", path, err)),
    }
}

/// Lock guarding one execute file: `L<name>` next to it.
pub fn file_lock_path(file: &Path) -> Result<PathBuf, Error> {
    prefixed_sibling(file, "L")
}

/// Claim `file` so no other scan processes it at the same time.
pub async fn lock_file(ctx: &Context, file: &Path) -> Result<LockAttempt, Error> {
    lock_at(ctx, &file_lock_path(file)?).await
}

pub async fn unlock_file(file: &Path) -> Result<(), Error> {
    unlock_at(&file_lock_path(file)?).await
}

/// Private working directory of executor slot `index`.
pub fn execution_directory(ctx: &Context, index: usize) -> PathBuf {
    if index == 0 {
        join2(ctx.spool_dir(), EXECUTION_DIR)
    } else {
        join2(ctx.spool_dir(), format!("{EXECUTION_DIR}{index:04}"))
    }
}

/// Make sure the slot's execution directory exists.
pub async fn ensure_execution_directory(ctx: &Context, index: usize) -> Result<PathBuf, Error> {
    let dir = execution_directory(ctx, index);
    let result = tokio::fs::DirBuilder::new()
        .mode(EXECUTION_DIR_MODE)
        .create(&dir)
        .await;
    match result {
        Ok(()) => Ok(dir),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(dir),
        Err(err) => Err(Error::io("mkdir", dir, err)),
    }
}

/// Remove everything left in the slot's execution directory.
pub async fn clean_execution_directory(ctx: &Context, index: usize) -> Result<(), Error> {
    let dir = execution_directory(ctx, index);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(Error::io("opendir", dir, err)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| Error::io("readdir", &dir, err))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|err| Error::io("stat", &path, err))?;
        let removed = if file_type.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match removed {
            Ok(()) => tracing::debug!("removed {:?}", path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io("remove", path, err)),
        }
    }
    Ok(())
}
