use std::path::PathBuf;

use tracing::instrument;

use crate::config::SpoolLayout;
use crate::context::Context;
use crate::error::Error;
use crate::locate::{locate, FileKind, EXECUTE_SYSTEM_LEN};
use crate::path::truncated;
use crate::seq::{next_sequence, Sequence};

/// Structured form of a generated spool file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolFileName<'a> {
    pub kind: FileKind,
    /// Remote system the file is queued for
    pub system: &'a str,
    /// Name the local system is known by on that remote
    pub local: &'a str,
    pub grade: char,
    pub sequence: &'a str,
    /// Data destined for a remote execution request
    pub execute: bool,
}

impl SpoolFileName<'_> {
    /// Simple file name under `layout`, as it is looked up again locally.
    pub fn render(&self, layout: SpoolLayout) -> String {
        let max = layout.max_system_len();
        let system = truncated(self.system, max);
        let local = truncated(self.local, max);
        let (grade, seq) = (self.grade, self.sequence);
        match (self.kind, layout) {
            (FileKind::Command, SpoolLayout::Taylor) => format!("C.{grade}{seq}"),
            (FileKind::Command, _) => format!("C.{system}{grade}{seq}"),
            (FileKind::Data, SpoolLayout::Taylor) if self.execute => format!("D.X{seq}"),
            (FileKind::Data, SpoolLayout::Taylor) => format!("D.{seq}"),
            (FileKind::Data, SpoolLayout::Bsd43 | SpoolLayout::Ultrix) if self.execute => {
                format!("D.{local}X{seq}")
            }
            (FileKind::Data, _) => format!("D.{local}{grade}{seq}"),
            (FileKind::Execute, _) => format!(
                "X.{}{grade}{seq}",
                truncated(self.system, Some(EXECUTE_SYSTEM_LEN))
            ),
        }
    }

    /// Names the remote system is told to use for this data file: `(data, execute)`.
    pub fn remote_names(&self) -> (String, String) {
        let local = truncated(self.local, Some(EXECUTE_SYSTEM_LEN));
        (
            format!("D.{local}{}{}", self.grade, self.sequence),
            format!("X.{local}{}{}", self.grade, self.sequence),
        )
    }
}

/// A file name reserved in the spool tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    /// Where to create the file
    pub path: PathBuf,
    /// Simple name to record in command files and pass to [`locate`] later
    pub transfer_name: String,
    /// Data file name to use on the remote side (data files only)
    pub remote_data_name: Option<String>,
    /// Execute file name to use on the remote side (data files only)
    pub remote_exec_name: Option<String>,
    pub sequence: Sequence,
}

/// Allocate a name that does not exist yet in the spool tree.
///
/// Each attempt consumes a sequence number for `system`; names already taken (left over from
/// a crash or dropped in by hand) are skipped.
#[instrument(skip(ctx))]
pub async fn new_file_name(
    ctx: &Context,
    kind: FileKind,
    system: &str,
    local_alias: Option<&str>,
    grade: char,
    execute: bool,
) -> Result<NewFile, Error> {
    let local = local_alias.unwrap_or(ctx.local_name());
    let locate_grade = match kind {
        FileKind::Command | FileKind::Data => Some(grade),
        FileKind::Execute => None,
    };
    loop {
        let sequence = next_sequence(ctx, system).await?;
        let name = SpoolFileName {
            kind,
            system,
            local,
            grade,
            sequence: sequence.as_str(),
            execute,
        };
        let transfer_name = name.render(ctx.layout());
        let path = locate(ctx, &transfer_name, system, locate_grade)?;
        match tokio::fs::symlink_metadata(&path).await {
            Ok(_) => {
                tracing::warn!("spool file {:?} already exists, trying next sequence", path);
                continue;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io("stat", path, err)),
        }
        let (remote_data_name, remote_exec_name) = match kind {
            FileKind::Data => {
                let (data, exec) = name.remote_names();
                (Some(data), Some(exec))
            }
            _ => (None, None),
        };
        return Ok(NewFile {
            path,
            transfer_name,
            remote_data_name,
            remote_exec_name,
            sequence,
        });
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::testutils;

    fn name<'a>(kind: FileKind, system: &'a str, execute: bool) -> SpoolFileName<'a> {
        SpoolFileName {
            kind,
            system,
            local: "localhostname",
            grade: 'N',
            sequence: "0a1Z",
            execute,
        }
    }

    #[test]
    fn rendering_per_layout() {
        use FileKind::*;
        use SpoolLayout::*;
        let cases = [
            (Hdb, Command, false, "C.longsysN0a1Z"),
            (Ultrix, Command, false, "C.longsystemnameN0a1Z"),
            (Taylor, Command, false, "C.N0a1Z"),
            (Hdb, Data, false, "D.localhoN0a1Z"),
            (Hdb, Data, true, "D.localhoN0a1Z"),
            (Bsd43, Data, true, "D.localhoX0a1Z"),
            (Ultrix, Data, true, "D.localhostnameX0a1Z"),
            (Taylor, Data, true, "D.X0a1Z"),
            (Taylor, Data, false, "D.0a1Z"),
            (V2, Execute, false, "X.longsysN0a1Z"),
            (Taylor, Execute, false, "X.longsysN0a1Z"),
        ];
        for (layout, kind, execute, expected) in cases {
            assert_eq!(
                name(kind, "longsystemname", execute).render(layout),
                expected,
                "{layout} {kind:?}"
            );
        }
        assert_eq!(
            name(Data, "foo", false).remote_names(),
            ("D.localhoN0a1Z".to_string(), "X.localhoN0a1Z".to_string())
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn hdb_command_file_name() -> Result<(), anyhow::Error> {
        let (dir, ctx) = testutils::setup_context(SpoolLayout::Hdb).await?;
        let file = new_file_name(&ctx, FileKind::Command, "foo", Some("local7"), 'A', false).await?;
        let seq = file.sequence.as_str();
        assert_eq!(file.transfer_name, format!("C.fooA{seq}"));
        assert_eq!(seq.len(), 4);
        assert!(seq.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(file.path, dir.join("spool").join("foo").join(&file.transfer_name));
        assert_eq!(locate(&ctx, &file.transfer_name, "foo", None)?, file.path);
        assert_eq!(file.remote_data_name, None);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn data_files_carry_remote_names() -> Result<(), anyhow::Error> {
        let (dir, ctx) = testutils::setup_context(SpoolLayout::Taylor).await?;
        let file = new_file_name(&ctx, FileKind::Data, "foo", None, 'A', true).await?;
        assert_eq!(file.transfer_name, "D.X0001");
        assert_eq!(file.path, dir.join("spool/foo/D.X/D.X0001"));
        assert_eq!(file.remote_data_name.as_deref(), Some("D.local7A0001"));
        assert_eq!(file.remote_exec_name.as_deref(), Some("X.local7A0001"));
        let file = new_file_name(&ctx, FileKind::Data, "foo", None, 'A', false).await?;
        assert_eq!(file.path, dir.join("spool/foo/D./D.0002"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn existing_names_are_skipped() -> Result<(), anyhow::Error> {
        let (dir, ctx) = testutils::setup_context(SpoolLayout::Hdb).await?;
        let taken = dir.join("spool").join("foo");
        tokio::fs::create_dir_all(&taken).await?;
        tokio::fs::write(taken.join("C.fooA0001"), b"").await?;
        let file = new_file_name(&ctx, FileKind::Command, "foo", None, 'A', false).await?;
        assert_eq!(file.transfer_name, "C.fooA0002");
        assert!(logs_contain("already exists"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn generated_names_locate_to_their_path() -> Result<(), anyhow::Error> {
        for layout in SpoolLayout::ALL {
            let (_dir, ctx) = testutils::setup_context(layout).await?;
            for kind in [FileKind::Command, FileKind::Data, FileKind::Execute] {
                for execute in [false, true] {
                    let file = new_file_name(&ctx, kind, "remote1", None, 'C', execute).await?;
                    let grade = (kind != FileKind::Execute).then_some('C');
                    assert_eq!(
                        locate(&ctx, &file.transfer_name, "remote1", grade)?,
                        file.path,
                        "{layout} {kind:?} {execute}"
                    );
                }
            }
        }
        Ok(())
    }
}
