use std::path::PathBuf;

use crate::config::SpoolLayout;
use crate::context::Context;
use crate::error::Error;
use crate::path::{check_system_name, is_spool_file, join2, join3, join4, truncated};
use crate::seq::SEQUENCE_LEN;

/// Directory used by the Ultrix layout for systems without their own tree
pub const ULTRIX_DEFAULT_DIR: &str = "DEFAULT";

/// Prefix of a command file that has not yet been renamed into place
const TEMP_COMMAND_PREFIX: &str = "TMP";

/// Execute file names carry the system name in at most this many characters
pub const EXECUTE_SYSTEM_LEN: usize = 7;

/// The three kinds of spool entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Command,
    Data,
    Execute,
}

impl FileKind {
    pub fn prefix(self) -> &'static str {
        match self {
            FileKind::Command => "C.",
            FileKind::Data => "D.",
            FileKind::Execute => "X.",
        }
    }

    /// Classify a simple name, or fail for anything that is not a spool entry.
    ///
    /// `TM.` files and `TMP` names are placed like command files.
    pub fn of(simple: &str) -> Result<Self, Error> {
        if let Some(rest) = simple.strip_prefix(TEMP_COMMAND_PREFIX) {
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_graphic() && b != b'/') {
                return Ok(FileKind::Command);
            }
        } else if is_spool_file(simple) {
            return Ok(match simple.as_bytes()[0] {
                b'D' => FileKind::Data,
                b'X' => FileKind::Execute,
                _ => FileKind::Command,
            });
        }
        tracing::error!("unrecognized file name {:?}", simple);
        Err(Error::UnrecognizedFileName(simple.to_string()))
    }
}

/// `system` if `<spool>/sys/<system>` is a directory, the shared default tree otherwise.
pub fn ultrix_system_dir<'a>(ctx: &Context, system: &'a str) -> &'a str {
    if join3(ctx.spool_dir(), "sys", system).is_dir() {
        system
    } else {
        ULTRIX_DEFAULT_DIR
    }
}

/// Last `n` characters of `name`, if it has that many.
fn tail(name: &str, n: usize) -> Option<&str> {
    name.len().checked_sub(n).and_then(|idx| name.get(idx..))
}

/// Grade embedded in a command file name (`<grade><seq>` closes the name).
pub fn command_grade(simple: &str) -> Option<char> {
    if simple.len() < 2 + SEQUENCE_LEN + 1 {
        return None;
    }
    tail(simple, SEQUENCE_LEN + 1).and_then(|rest| rest.chars().next())
}

/// Rebuild an execute file name around the trusted system name.
///
/// The system embedded in an `X.` name came from whoever created the file, possibly a remote
/// peer; only the trailing grade and sequence number are kept.
fn trusted_execute_name(simple: &str, system: &str) -> Result<String, Error> {
    let suffix = tail(simple, SEQUENCE_LEN + 1)
        .filter(|_| simple.len() > 2 + SEQUENCE_LEN + 1)
        .ok_or_else(|| Error::UnrecognizedFileName(simple.to_string()))?;
    Ok(format!(
        "X.{}{}",
        truncated(system, Some(EXECUTE_SYSTEM_LEN)),
        suffix
    ))
}

/// Subdirectory for a data file in the layouts that split local data by origin.
fn origin_data_dir(simple: &str, local: &str) -> String {
    match simple[2..].strip_prefix(local) {
        Some(rest) if rest.starts_with('X') => format!("D.{local}X"),
        Some(_) => format!("D.{local}"),
        None => "D.".to_string(),
    }
}

/// Taylor execute-bound data files are exactly `D.X<seq>`.
fn is_taylor_execute_data(simple: &str) -> bool {
    simple.len() == 3 + SEQUENCE_LEN && simple.starts_with("D.X")
}

/// Compute the path of `simple` for `system` under the configured layout.
///
/// `grade` matters only for the SVR4 layout, which files local command and data files by
/// grade; for command files the grade embedded in the name is used when none is given.
pub fn locate(
    ctx: &Context,
    simple: &str,
    system: &str,
    grade: Option<char>,
) -> Result<PathBuf, Error> {
    let kind = FileKind::of(simple)?;
    check_system_name(system)?;
    let layout = ctx.layout();
    let spool = ctx.spool_dir();
    let rebuilt;
    let simple = match (kind, layout) {
        (
            FileKind::Execute,
            SpoolLayout::V2 | SpoolLayout::Bsd42 | SpoolLayout::Bsd43 | SpoolLayout::Ultrix,
        ) => {
            rebuilt = trusted_execute_name(simple, system)?;
            rebuilt.as_str()
        }
        _ => simple,
    };
    let local = truncated(ctx.local_name(), layout.max_system_len());
    let path = match layout {
        SpoolLayout::V2 => join2(spool, simple),
        SpoolLayout::Bsd42 => join3(spool, kind.prefix(), simple),
        SpoolLayout::Bsd43 => match kind {
            FileKind::Data => join3(spool, origin_data_dir(simple, local), simple),
            _ => join3(spool, kind.prefix(), simple),
        },
        SpoolLayout::Hdb => join3(spool, system, simple),
        SpoolLayout::Svr4 => {
            let grade = match kind {
                FileKind::Command => grade.or_else(|| command_grade(simple)),
                FileKind::Data => grade,
                FileKind::Execute => None,
            };
            match grade {
                Some(grade) => join4(spool, system, grade.to_string(), simple),
                None if kind == FileKind::Command => {
                    tracing::error!("no grade for command file {:?}", simple);
                    return Err(Error::UnrecognizedFileName(simple.to_string()));
                }
                None => join3(spool, system, simple),
            }
        }
        SpoolLayout::Ultrix => {
            let dir = join3(spool, "sys", ultrix_system_dir(ctx, system));
            let sub = match kind {
                FileKind::Data => origin_data_dir(simple, local),
                _ => kind.prefix().to_string(),
            };
            join3(dir, sub, simple)
        }
        SpoolLayout::Taylor => {
            let sub = match kind {
                FileKind::Data if is_taylor_execute_data(simple) => "D.X",
                _ => kind.prefix(),
            };
            join4(spool, system, sub, simple)
        }
    };
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;

    async fn context(layout: SpoolLayout) -> (PathBuf, Context) {
        let (dir, ctx) = testutils::setup_context(layout).await.unwrap();
        (dir.join("spool"), ctx)
    }

    #[tokio::test]
    async fn path_injection_is_rejected() {
        for layout in SpoolLayout::ALL {
            let (_spool, ctx) = context(layout).await;
            for bad in [
                "../../etc/passwd",
                "/etc/passwd",
                "C./../../etc/passwd",
                "passwd",
                "E.foo",
                "TMP../x",
                "TMP",
                "",
            ] {
                let err = locate(&ctx, bad, "foo", Some('A')).unwrap_err();
                assert!(
                    matches!(err, Error::UnrecognizedFileName(_)),
                    "{layout}: {bad:?} gave {err}"
                );
            }
        }
    }

    #[tokio::test]
    async fn bad_system_names_are_rejected() {
        let (_spool, ctx) = context(SpoolLayout::Hdb).await;
        for bad in ["..", "../etc", "a/b", ""] {
            let err = locate(&ctx, "C.fooA0001", bad, None).unwrap_err();
            assert!(matches!(err, Error::BadSystemName(_)));
        }
    }

    #[tokio::test]
    async fn command_files_per_layout() {
        let cases = [
            (SpoolLayout::V2, "C.fooA0001", "C.fooA0001"),
            (SpoolLayout::Bsd42, "C.fooA0001", "C./C.fooA0001"),
            (SpoolLayout::Bsd43, "C.fooA0001", "C./C.fooA0001"),
            (SpoolLayout::Hdb, "C.fooA0001", "foo/C.fooA0001"),
            (SpoolLayout::Svr4, "C.fooA0001", "foo/A/C.fooA0001"),
            (SpoolLayout::Ultrix, "C.fooA0001", "sys/DEFAULT/C./C.fooA0001"),
            (SpoolLayout::Taylor, "C.A0001", "foo/C./C.A0001"),
        ];
        for (layout, simple, expected) in cases {
            let (spool, ctx) = context(layout).await;
            assert_eq!(
                locate(&ctx, simple, "foo", None).unwrap(),
                spool.join(expected),
                "{layout}"
            );
        }
    }

    #[tokio::test]
    async fn data_files_per_layout() {
        let cases = [
            (SpoolLayout::V2, "D.local7A0001", None, "D.local7A0001"),
            (SpoolLayout::Bsd42, "D.local7A0001", None, "D./D.local7A0001"),
            (SpoolLayout::Bsd43, "D.local7A0001", None, "D.local7/D.local7A0001"),
            (SpoolLayout::Bsd43, "D.local7X0001", None, "D.local7X/D.local7X0001"),
            (SpoolLayout::Bsd43, "D.fooA0001", None, "D./D.fooA0001"),
            (SpoolLayout::Hdb, "D.local7A0001", None, "foo/D.local7A0001"),
            (SpoolLayout::Svr4, "D.local7A0001", Some('A'), "foo/A/D.local7A0001"),
            (SpoolLayout::Svr4, "D.fooA0001", None, "foo/D.fooA0001"),
            (
                SpoolLayout::Ultrix,
                "D.local7X0001",
                None,
                "sys/DEFAULT/D.local7X/D.local7X0001",
            ),
            (SpoolLayout::Taylor, "D.X0001", None, "foo/D.X/D.X0001"),
            (SpoolLayout::Taylor, "D.0001", None, "foo/D./D.0001"),
            (SpoolLayout::Taylor, "D.Xenix0A0001", None, "foo/D./D.Xenix0A0001"),
        ];
        for (layout, simple, grade, expected) in cases {
            let (spool, ctx) = context(layout).await;
            assert_eq!(
                locate(&ctx, simple, "foo", grade).unwrap(),
                spool.join(expected),
                "{layout} {simple}"
            );
        }
    }

    #[tokio::test]
    async fn execute_names_use_trusted_system() {
        let (spool, ctx) = context(SpoolLayout::Bsd42).await;
        assert_eq!(
            locate(&ctx, "X.evilhostA0001", "foo", None).unwrap(),
            spool.join("X.").join("X.fooA0001")
        );
        let (spool, ctx) = context(SpoolLayout::V2).await;
        assert_eq!(
            locate(&ctx, "X.evilB00ff", "longsystemname", None).unwrap(),
            spool.join("X.longsysB00ff")
        );
        // layouts with per system directories keep the name as given
        let (spool, ctx) = context(SpoolLayout::Hdb).await;
        assert_eq!(
            locate(&ctx, "X.evilhostA0001", "foo", None).unwrap(),
            spool.join("foo").join("X.evilhostA0001")
        );
        let (_spool, ctx) = context(SpoolLayout::Bsd43).await;
        assert!(locate(&ctx, "X.A0001", "foo", None).is_err());
    }

    #[tokio::test]
    async fn ultrix_uses_system_tree_when_present() {
        let (spool, ctx) = context(SpoolLayout::Ultrix).await;
        std::fs::create_dir_all(spool.join("sys").join("foo")).unwrap();
        assert_eq!(
            locate(&ctx, "X.fooA0001", "foo", None).unwrap(),
            spool.join("sys/foo/X./X.fooA0001")
        );
        assert_eq!(
            locate(&ctx, "X.barA0001", "bar", None).unwrap(),
            spool.join("sys/DEFAULT/X./X.barA0001")
        );
    }

    #[tokio::test]
    async fn temporary_command_names_are_placed_like_commands() {
        let (spool, ctx) = context(SpoolLayout::Taylor).await;
        assert_eq!(
            locate(&ctx, "TMP0000001234", "foo", None).unwrap(),
            spool.join("foo/C./TMP0000001234")
        );
        assert_eq!(
            locate(&ctx, "TM.01234.000", "foo", None).unwrap(),
            spool.join("foo/C./TM.01234.000")
        );
    }

    #[test]
    fn file_kinds() {
        assert_eq!(FileKind::of("C.fooA0001").unwrap(), FileKind::Command);
        assert_eq!(FileKind::of("D.0001").unwrap(), FileKind::Data);
        assert_eq!(FileKind::of("X.fooA0001").unwrap(), FileKind::Execute);
        assert_eq!(FileKind::of("TM.1").unwrap(), FileKind::Command);
        assert!(FileKind::of("L.foo").is_err());
        assert_eq!(command_grade("C.fooA0001"), Some('A'));
        assert_eq!(command_grade("C.A01"), None);
    }
}
