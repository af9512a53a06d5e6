use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::context::Context;
use crate::error::Error;
use crate::jobid::{self, DecodedJobId};
use crate::locate::locate;
use crate::path::is_spool_file;

/// Data file name recorded when a file is sent straight from its original location
const UNSPOOLED_DATA: &str = "D.0";

/// Kind of one line in a command file
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// `S`: send a local file
    Send,
    /// `R`: fetch a remote file
    Receive,
    /// `X`: ask the remote to send files to a third system
    Forward,
    /// `E`: send a file and run a command on it
    Execute,
}

/// One request of a command file
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Request {
    pub kind: RequestKind,
    pub from: String,
    pub to: String,
    pub user: String,
    pub options: String,
    /// Spooled copy of the file being sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Request {
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let kind = match *fields.first()? {
            "S" => RequestKind::Send,
            "R" => RequestKind::Receive,
            "X" => RequestKind::Forward,
            "E" => RequestKind::Execute,
            _ => return None,
        };
        let field = |idx: usize| fields.get(idx).map(|f| f.to_string());
        let (from, to) = (field(1)?, field(2)?);
        let user = field(3).unwrap_or_default();
        let options = field(4).unwrap_or_default();
        let (data_file, command) = match kind {
            RequestKind::Send => (field(5), None),
            RequestKind::Execute => {
                let command = (fields.len() > 9).then(|| fields[9..].join(" "));
                (field(5), command)
            }
            RequestKind::Receive | RequestKind::Forward => (None, None),
        };
        Some(Self {
            kind,
            from,
            to,
            user,
            options,
            data_file,
            command,
        })
    }

    /// Spooled data file that belongs to this request, if any.
    pub fn spooled_data(&self) -> Option<&str> {
        self.data_file
            .as_deref()
            .filter(|name| *name != UNSPOOLED_DATA && is_spool_file(name))
    }

    /// One line description for listings.
    pub fn describe(&self) -> String {
        match self.kind {
            RequestKind::Send => format!("Sending {} to {}", self.from, self.to),
            RequestKind::Receive => format!("Requesting {} to {}", self.from, self.to),
            RequestKind::Forward => format!("Forwarding {} to {}", self.from, self.to),
            RequestKind::Execute => format!(
                "Executing {} (sending {})",
                self.command.as_deref().unwrap_or("?"),
                self.from
            ),
        }
    }
}

/// Parse the requests of a command file, skipping lines that are not requests.
pub fn parse_command_file(contents: &str) -> Vec<Request> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let request = Request::parse(line);
            if request.is_none() {
                tracing::warn!("ignoring command file line {:?}", line);
            }
            request
        })
        .collect()
}

pub async fn read_requests(path: &Path) -> Result<Vec<Request>, Error> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::io("read", path, err))?;
    Ok(parse_command_file(&contents))
}

async fn remove_if_present(path: &Path) -> Result<bool, Error> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::io("remove", path, err)),
    }
}

/// Cancel a job: remove its spooled data files, then its command file.
///
/// Returns every file that was removed.
#[instrument(skip(ctx))]
pub async fn kill_job(ctx: &Context, job_id: &str) -> Result<Vec<PathBuf>, Error> {
    let DecodedJobId {
        system,
        grade,
        path,
        ..
    } = jobid::decode(ctx, job_id)?;
    let requests = read_requests(&path).await?;
    let mut removed = vec![];
    for request in &requests {
        let Some(data) = request.spooled_data() else {
            continue;
        };
        let data_path = locate(ctx, data, &system, Some(grade))?;
        if remove_if_present(&data_path).await? {
            tracing::debug!("removed data file {:?}", data_path);
            removed.push(data_path);
        }
    }
    if remove_if_present(&path).await? {
        removed.push(path);
    }
    tracing::info!("killed job {} ({} files)", job_id, removed.len());
    Ok(removed)
}

/// Reset the command file's modification time to now so the job is not aged out.
#[instrument(skip(ctx))]
pub async fn rejuvenate_job(ctx: &Context, job_id: &str) -> Result<PathBuf, Error> {
    let path = jobid::decode(ctx, job_id)?.path;
    let target = path.clone();
    tokio::task::spawn_blocking(move || {
        nix::sys::stat::utimensat(
            nix::fcntl::AT_FDCWD,
            &target,
            &nix::sys::time::TimeSpec::UTIME_OMIT,
            &nix::sys::time::TimeSpec::UTIME_NOW,
            nix::sys::stat::UtimensatFlags::FollowSymlink,
        )
    })
    .await
    .map_err(|err| Error::io("utime", &path, std::io::Error::other(err)))?
    .map_err(|errno| Error::io("utime", &path, errno.into()))?;
    Ok(path)
}
