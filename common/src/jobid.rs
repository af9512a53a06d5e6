//! Job ids shown to users and their mapping back to command files
//!
//! Legacy layouts build the id from the system, the grade and the four sequence characters
//! (`fooA0f3c`). The Taylor layout has no system name in its command file names and keeps the
//! whole `.<grade><seq>` suffix instead (`foo.N0a1Z`).

use std::path::PathBuf;

use crate::config::SpoolLayout;
use crate::context::Context;
use crate::error::Error;
use crate::locate::{locate, FileKind};
use crate::name::SpoolFileName;
use crate::path::{base_name, check_system_name};
use crate::seq::{SequenceAlphabet, SEQUENCE_LEN};

/// Job id for the command file `file` queued for `system`.
///
/// `file` may be a simple name or a path; only its base name is used.
pub fn encode(layout: SpoolLayout, system: &str, file: &str, grade: char) -> String {
    let base = base_name(file);
    match layout {
        SpoolLayout::Taylor => {
            let start = base.len().saturating_sub(SEQUENCE_LEN + 2);
            format!("{system}{}", base.get(start..).unwrap_or(base))
        }
        _ => {
            let start = base.len().saturating_sub(SEQUENCE_LEN);
            format!("{system}{grade}{}", base.get(start..).unwrap_or(base))
        }
    }
}

/// Fields recovered from a job id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdParts {
    pub system: String,
    pub grade: char,
    pub sequence: String,
}

/// Split a job id into system, grade and sequence without touching the filesystem.
pub fn parse(layout: SpoolLayout, job_id: &str) -> Result<JobIdParts, Error> {
    let bad = || Error::BadJobId(job_id.to_string());
    let alphabet = SequenceAlphabet::for_layout(layout);
    let (system, suffix) = match layout {
        SpoolLayout::Taylor => {
            let (system, suffix) = job_id.rsplit_once('.').ok_or_else(bad)?;
            (system, suffix)
        }
        _ => {
            let split = job_id
                .len()
                .checked_sub(SEQUENCE_LEN + 1)
                .filter(|idx| *idx > 0)
                .ok_or_else(bad)?;
            if !job_id.is_char_boundary(split) {
                return Err(bad());
            }
            job_id.split_at(split)
        }
    };
    if suffix.len() != SEQUENCE_LEN + 1 {
        return Err(bad());
    }
    let (grade, sequence) = suffix.split_at(1);
    let grade = grade.chars().next().ok_or_else(bad)?;
    if !grade.is_ascii_alphanumeric() || !alphabet.is_valid(sequence) {
        return Err(bad());
    }
    check_system_name(system).map_err(|_| bad())?;
    Ok(JobIdParts {
        system: system.to_string(),
        grade,
        sequence: sequence.to_string(),
    })
}

/// A job id resolved to its command file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedJobId {
    pub system: String,
    pub grade: char,
    /// Simple name of the command file
    pub command_name: String,
    pub path: PathBuf,
}

/// Resolve a job id to the command file [`crate::name::new_file_name`] created for it.
///
/// The file is not required to exist.
pub fn decode(ctx: &Context, job_id: &str) -> Result<DecodedJobId, Error> {
    let parts = parse(ctx.layout(), job_id).inspect_err(|err| {
        tracing::error!("{}", err);
    })?;
    let command_name = SpoolFileName {
        kind: FileKind::Command,
        system: &parts.system,
        local: ctx.local_name(),
        grade: parts.grade,
        sequence: &parts.sequence,
        execute: false,
    }
    .render(ctx.layout());
    let path = locate(ctx, &command_name, &parts.system, Some(parts.grade))?;
    Ok(DecodedJobId {
        system: parts.system,
        grade: parts.grade,
        command_name,
        path,
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tracing_test::traced_test;

    use super::*;
    use crate::name::new_file_name;
    use crate::testutils;

    #[test]
    fn encode_per_layout() {
        assert_eq!(
            encode(SpoolLayout::Hdb, "foo", "foo/C.fooA0f3c", 'A'),
            "fooA0f3c"
        );
        assert_eq!(
            encode(SpoolLayout::Bsd42, "longsystemname", "C.longsysN0001", 'N'),
            "longsystemnameN0001"
        );
        assert_eq!(
            encode(SpoolLayout::Taylor, "foo", "/spool/foo/C./C.N0a1Z", 'N'),
            "foo.N0a1Z"
        );
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for (layout, bad) in [
            (SpoolLayout::Hdb, ""),
            (SpoolLayout::Hdb, "A0001"),
            (SpoolLayout::Hdb, "fooA00g1"),
            (SpoolLayout::Hdb, "foo-0001"),
            (SpoolLayout::Hdb, "../A0001"),
            (SpoolLayout::Taylor, "fooN0001"),
            (SpoolLayout::Taylor, "foo.N001"),
            (SpoolLayout::Taylor, ".N0001"),
            (SpoolLayout::Taylor, "foo.N00/1"),
            (SpoolLayout::Taylor, "foo/bar.N0001"),
        ] {
            let err = parse(layout, bad).unwrap_err();
            assert!(matches!(err, Error::BadJobId(_)), "{layout} {bad:?}");
        }
    }

    #[test]
    fn taylor_system_may_contain_dots() {
        let parts = parse(SpoolLayout::Taylor, "uucp.example.com.N0a1Z").unwrap();
        assert_eq!(parts.system, "uucp.example.com");
        assert_eq!(parts.grade, 'N');
        assert_eq!(parts.sequence, "0a1Z");
    }

    fn sequence_for(layout: SpoolLayout) -> BoxedStrategy<String> {
        match SequenceAlphabet::for_layout(layout) {
            SequenceAlphabet::Hex => "[0-9a-f]{4}".boxed(),
            SequenceAlphabet::Odometer => "[0-9A-Za-z_-]{4}".boxed(),
        }
    }

    fn layout_and_sequence() -> impl Strategy<Value = (SpoolLayout, String)> {
        proptest::sample::select(SpoolLayout::ALL.to_vec())
            .prop_flat_map(|layout| (Just(layout), sequence_for(layout)))
    }

    proptest! {
        #[test]
        fn parse_inverts_encode(
            (layout, sequence) in layout_and_sequence(),
            system in "[a-z][a-z0-9.-]{0,15}",
            grade in "[0-9A-Za-z]",
        ) {
            let grade = grade.chars().next().unwrap();
            let name = SpoolFileName {
                kind: FileKind::Command,
                system: &system,
                local: "local7",
                grade,
                sequence: &sequence,
                execute: false,
            }
            .render(layout);
            let job_id = encode(layout, &system, &name, grade);
            let parts = parse(layout, &job_id).unwrap();
            prop_assert_eq!(parts.system, system);
            prop_assert_eq!(parts.grade, grade);
            prop_assert_eq!(parts.sequence, sequence);
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn decode_finds_generated_command_file() -> Result<(), anyhow::Error> {
        for layout in SpoolLayout::ALL {
            let (_dir, ctx) = testutils::setup_context(layout).await?;
            for (system, grade) in [("foo", 'A'), ("longsystemname", 'z'), ("a.b", '0')] {
                let file =
                    new_file_name(&ctx, FileKind::Command, system, None, grade, false).await?;
                let job_id = encode(layout, system, &file.transfer_name, grade);
                let decoded = decode(&ctx, &job_id)?;
                assert_eq!(decoded.path, file.path, "{layout} {job_id}");
                assert_eq!(decoded.command_name, file.transfer_name);
                assert_eq!(decoded.system, system);
                assert_eq!(decoded.grade, grade);
            }
        }
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn decode_rejects_garbage() -> Result<(), anyhow::Error> {
        let (_dir, ctx) = testutils::setup_context(SpoolLayout::Taylor).await?;
        let err = decode(&ctx, "nonsense").unwrap_err();
        assert!(matches!(err, Error::BadJobId(_)));
        assert!(logs_contain("bad job id"));
        Ok(())
    }
}
