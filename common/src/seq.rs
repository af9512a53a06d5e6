use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::config::SpoolLayout;
use crate::context::Context;
use crate::error::Error;
use crate::lock::{lock_wait, LockScope};
use crate::locate::ultrix_system_dir;
use crate::path::{check_system_name, join2, join3};

/// Width of every sequence number on disk and in file names
pub const SEQUENCE_LEN: usize = 4;

/// Lock serializing all sequence file updates (spool relative)
pub const SEQUENCE_LOCK: &str = "LCK..SEQ";

const ODOMETER_DIGITS: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

const SEQUENCE_FILE_MODE: u32 = 0o644;

/// Digits a layout uses for sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceAlphabet {
    /// Lowercase hexadecimal, `0000` through `ffff`
    Hex,
    /// 64 symbols, incremented digit by digit from the right
    Odometer,
}

impl SequenceAlphabet {
    pub fn for_layout(layout: SpoolLayout) -> Self {
        match layout {
            SpoolLayout::Ultrix | SpoolLayout::Taylor => SequenceAlphabet::Odometer,
            _ => SequenceAlphabet::Hex,
        }
    }

    pub fn contains(self, c: u8) -> bool {
        match self {
            SequenceAlphabet::Hex => c.is_ascii_digit() || (b'a'..=b'f').contains(&c),
            SequenceAlphabet::Odometer => ODOMETER_DIGITS.contains(&c),
        }
    }

    /// Whether `seq` is a well formed sequence number for this alphabet
    pub fn is_valid(self, seq: &str) -> bool {
        seq.len() == SEQUENCE_LEN && seq.bytes().all(|c| self.contains(c))
    }

    /// The value following `current`, wrapping to `0000` after the largest value.
    ///
    /// Unparseable input is treated the way the counter file always was: hex reads as many
    /// leading digits as it can, and an odometer digit outside the alphabet rolls over to `0`
    /// and carries, like `-` does.
    pub fn increment(self, current: &[u8]) -> String {
        match self {
            SequenceAlphabet::Hex => {
                let digits = current
                    .iter()
                    .take(SEQUENCE_LEN)
                    .take_while(|c| c.is_ascii_hexdigit())
                    .fold(0u32, |acc, c| acc * 16 + (*c as char).to_digit(16).unwrap_or(0));
                let next = if digits >= 0xffff { 0 } else { digits + 1 };
                format!("{next:04x}")
            }
            SequenceAlphabet::Odometer => {
                let mut seq = [b'0'; SEQUENCE_LEN];
                for (slot, c) in seq.iter_mut().zip(current.iter()) {
                    *slot = *c;
                }
                for digit in seq.iter_mut().rev() {
                    match ODOMETER_DIGITS.iter().position(|c| c == digit) {
                        Some(idx) if idx + 1 < ODOMETER_DIGITS.len() => {
                            *digit = ODOMETER_DIGITS[idx + 1];
                            break;
                        }
                        _ => *digit = b'0',
                    }
                }
                String::from_utf8_lossy(&seq).into_owned()
            }
        }
    }
}

/// A sequence number as it appears in file names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sequence(String);

impl Sequence {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counter file holding the last sequence number handed out for `system`.
pub fn sequence_file(ctx: &Context, system: &str) -> PathBuf {
    let spool = ctx.spool_dir();
    match ctx.layout() {
        SpoolLayout::V2 | SpoolLayout::Bsd42 | SpoolLayout::Bsd43 => join2(spool, "SEQF"),
        SpoolLayout::Hdb | SpoolLayout::Svr4 => join3(spool, ".Sequence", system),
        SpoolLayout::Ultrix => join2(
            join3(spool, "sys", ultrix_system_dir(ctx, system)),
            ".SEQF",
        ),
        SpoolLayout::Taylor => join3(spool, system, "SEQF"),
    }
}

async fn open_counter(path: &std::path::Path) -> Result<tokio::fs::File, Error> {
    let mut options = tokio::fs::OpenOptions::new();
    options
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(SEQUENCE_FILE_MODE);
    match options.open(path).await {
        Ok(file) => Ok(file),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| Error::io("mkdir", parent, err))?;
            }
            options
                .open(path)
                .await
                .map_err(|err| Error::io("open", path, err))
        }
        Err(err) => Err(Error::io("open", path, err)),
    }
}

async fn advance_counter(
    alphabet: SequenceAlphabet,
    path: &std::path::Path,
) -> Result<Sequence, Error> {
    let mut file = open_counter(path).await?;
    let mut current = Vec::with_capacity(SEQUENCE_LEN);
    (&mut file)
        .take(SEQUENCE_LEN as u64)
        .read_to_end(&mut current)
        .await
        .map_err(|err| Error::io("read", path, err))?;
    if current.len() != SEQUENCE_LEN {
        current = b"0000".to_vec();
    }
    let next = alphabet.increment(&current);
    file.seek(std::io::SeekFrom::Start(0))
        .await
        .map_err(|err| Error::io("lseek", path, err))?;
    file.write_all(next.as_bytes())
        .await
        .map_err(|err| Error::io("write", path, err))?;
    file.flush()
        .await
        .map_err(|err| Error::io("write", path, err))?;
    Ok(Sequence(next))
}

/// Advance and return the sequence number for `system`.
///
/// Blocks while another live process holds the sequence lock; fails on a termination signal,
/// a lock error or any counter file I/O error. The lock is released in every case.
#[instrument(skip(ctx))]
pub async fn next_sequence(ctx: &Context, system: &str) -> Result<Sequence, Error> {
    check_system_name(system)?;
    let handle = lock_wait(ctx, SEQUENCE_LOCK, LockScope::Spool).await?;
    let path = sequence_file(ctx, system);
    let result = advance_counter(SequenceAlphabet::for_layout(ctx.layout()), &path).await;
    if let Err(err) = &result {
        tracing::error!("updating sequence file {:?}: {}", path, err);
    }
    if let Err(err) = handle.release().await {
        tracing::error!("releasing sequence lock: {}", err);
    }
    result
}
