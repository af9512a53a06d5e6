use std::collections::VecDeque;
use std::path::PathBuf;

use crate::config::SpoolLayout;
use crate::context::Context;
use crate::error::Error;
use crate::jobid;
use crate::locate::{
    command_grade, ultrix_system_dir, FileKind, EXECUTE_SYSTEM_LEN, ULTRIX_DEFAULT_DIR,
};
use crate::path::{check_system_name, is_spool_file, join2, join3, join4, truncated};
use crate::seq::SEQUENCE_LEN;

/// A command file waiting to be transferred
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QueuedJob {
    pub system: String,
    pub grade: char,
    pub job_id: String,
    pub path: PathBuf,
}

/// An execute file waiting to be run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteFile {
    pub system: String,
    pub path: PathBuf,
}

#[derive(Debug)]
struct ScanDir {
    /// System owning every file in the directory, when the layout says so
    system: Option<String>,
    path: PathBuf,
}

/// Directories that hold files of `kind`, to be read one after the other.
async fn scan_dirs(
    ctx: &Context,
    kind: FileKind,
    system: Option<&str>,
) -> Result<Vec<ScanDir>, Error> {
    if let Some(system) = system {
        check_system_name(system)?;
    }
    let spool = ctx.spool_dir();
    let owned = |system: &str, path: PathBuf| ScanDir {
        system: Some(system.to_string()),
        path,
    };
    let dirs = match ctx.layout() {
        SpoolLayout::V2 => vec![ScanDir {
            system: None,
            path: spool.to_owned(),
        }],
        SpoolLayout::Bsd42 | SpoolLayout::Bsd43 => vec![ScanDir {
            system: None,
            path: join2(spool, kind.prefix()),
        }],
        SpoolLayout::Hdb => systems(spool, system)
            .await?
            .iter()
            .map(|sys| owned(sys, join2(spool, sys)))
            .collect(),
        SpoolLayout::Svr4 => {
            let mut dirs = vec![];
            for sys in systems(spool, system).await? {
                let dir = join2(spool, &sys);
                if kind == FileKind::Command {
                    for grade in subdirectories(&dir).await? {
                        if grade.chars().count() == 1 {
                            dirs.push(owned(&sys, join2(&dir, grade)));
                        }
                    }
                } else {
                    dirs.push(owned(&sys, dir));
                }
            }
            dirs
        }
        SpoolLayout::Ultrix => {
            let trees = match system {
                Some(system) => vec![ultrix_system_dir(ctx, system).to_string()],
                None => subdirectories(&join2(spool, "sys")).await?,
            };
            trees
                .into_iter()
                .map(|tree| ScanDir {
                    path: join4(spool, "sys", &tree, kind.prefix()),
                    system: (tree != ULTRIX_DEFAULT_DIR).then_some(tree),
                })
                .collect()
        }
        SpoolLayout::Taylor => systems(spool, system)
            .await?
            .iter()
            .map(|sys| owned(sys, join3(spool, sys, kind.prefix())))
            .collect(),
    };
    Ok(dirs)
}

async fn systems(spool: &std::path::Path, only: Option<&str>) -> Result<Vec<String>, Error> {
    match only {
        Some(system) => Ok(vec![system.to_string()]),
        None => Ok(subdirectories(spool)
            .await?
            .into_iter()
            .filter(|name| check_system_name(name).is_ok())
            .collect()),
    }
}

/// Names of the non hidden directories in `dir`; nothing if it does not exist.
async fn subdirectories(dir: &std::path::Path) -> Result<Vec<String>, Error> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(Error::io("opendir", dir, err)),
    };
    let mut names = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| Error::io("readdir", dir, err))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry
            .file_type()
            .await
            .map_err(|err| Error::io("stat", entry.path(), err))?;
        if file_type.is_dir() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// System name embedded between the prefix and the trailing grade and sequence.
fn embedded_system(name: &str) -> Option<&str> {
    let end = name.len().checked_sub(SEQUENCE_LEN + 1)?;
    name.get(2..end).filter(|system| !system.is_empty())
}

struct DirCursor {
    ctx: Context,
    kind: FileKind,
    system: Option<String>,
    pending: Option<VecDeque<ScanDir>>,
    current: Option<(ScanDir, tokio::fs::ReadDir)>,
}

impl DirCursor {
    fn new(ctx: &Context, kind: FileKind, system: Option<&str>) -> Self {
        Self {
            ctx: ctx.clone(),
            kind,
            system: system.map(str::to_string),
            pending: None,
            current: None,
        }
    }

    /// Next file carrying this cursor's prefix, with the system it belongs to.
    async fn next_file(&mut self) -> Result<Option<(String, String, PathBuf)>, Error> {
        if self.pending.is_none() {
            let dirs = scan_dirs(&self.ctx, self.kind, self.system.as_deref()).await?;
            self.pending = Some(dirs.into());
        }
        loop {
            if let Some((dir, entries)) = self.current.as_mut() {
                let entry = entries
                    .next_entry()
                    .await
                    .map_err(|err| Error::io("readdir", &dir.path, err))?;
                if let Some(entry) = entry {
                    let dir_system = dir.system.clone();
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    if !name.starts_with(self.kind.prefix()) || !is_spool_file(&name) {
                        continue;
                    }
                    if let Some(system) = self.owner(dir_system.as_deref(), &name) {
                        return Ok(Some((system, name, entry.path())));
                    }
                    continue;
                }
                self.current = None;
            }
            let Some(dir) = self.pending.as_mut().and_then(VecDeque::pop_front) else {
                return Ok(None);
            };
            match tokio::fs::read_dir(&dir.path).await {
                Ok(entries) => self.current = Some((dir, entries)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(Error::io("opendir", dir.path, err)),
            }
        }
    }

    /// System a file belongs to, or `None` when it is for a system we are not scanning.
    fn owner(&self, dir_system: Option<&str>, name: &str) -> Option<String> {
        if let Some(system) = dir_system {
            return Some(system.to_string());
        }
        let embedded = embedded_system(name)?;
        let max = match self.kind {
            FileKind::Execute => Some(EXECUTE_SYSTEM_LEN),
            _ => self.ctx.layout().max_system_len(),
        };
        match &self.system {
            Some(wanted) if truncated(wanted, max) == embedded => Some(wanted.clone()),
            Some(_) => None,
            None => Some(embedded.to_string()),
        }
    }
}

/// Walks the command files queued for one system or for all of them.
pub struct CommandScanner {
    cursor: DirCursor,
}

impl CommandScanner {
    pub fn new(ctx: &Context, system: Option<&str>) -> Self {
        Self {
            cursor: DirCursor::new(ctx, FileKind::Command, system),
        }
    }

    pub async fn next(&mut self) -> Result<Option<QueuedJob>, Error> {
        while let Some((system, name, path)) = self.cursor.next_file().await? {
            let Some(grade) = command_grade(&name) else {
                tracing::debug!("skipping {:?}: no grade", path);
                continue;
            };
            let job_id = jobid::encode(self.cursor.ctx.layout(), &system, &name, grade);
            return Ok(Some(QueuedJob {
                system,
                grade,
                job_id,
                path,
            }));
        }
        Ok(None)
    }

    /// Drain the scanner.
    pub async fn collect(mut self) -> Result<Vec<QueuedJob>, Error> {
        let mut jobs = vec![];
        while let Some(job) = self.next().await? {
            jobs.push(job);
        }
        Ok(jobs)
    }
}

/// Walks the execute files waiting for one system or for all of them.
pub struct ExecuteScanner {
    cursor: DirCursor,
}

impl ExecuteScanner {
    pub fn new(ctx: &Context, system: Option<&str>) -> Self {
        Self {
            cursor: DirCursor::new(ctx, FileKind::Execute, system),
        }
    }

    pub async fn next(&mut self) -> Result<Option<ExecuteFile>, Error> {
        Ok(self
            .cursor
            .next_file()
            .await?
            .map(|(system, _, path)| ExecuteFile { system, path }))
    }
}
