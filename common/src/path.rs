use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Join a directory and a file name, without doubling the slash when `dir` is `/`.
pub fn join2(dir: impl AsRef<Path>, file: impl AsRef<Path>) -> PathBuf {
    let dir = dir.as_ref().as_os_str().as_bytes();
    let file = file.as_ref().as_os_str().as_bytes();
    let mut joined = Vec::with_capacity(dir.len() + file.len() + 1);
    joined.extend_from_slice(dir);
    if dir != b"/" {
        joined.push(b'/');
    }
    joined.extend_from_slice(file);
    PathBuf::from(OsString::from_vec(joined))
}

pub fn join3(dir1: impl AsRef<Path>, dir2: impl AsRef<Path>, file: impl AsRef<Path>) -> PathBuf {
    join2(join2(dir1, dir2), file)
}

pub fn join4(
    dir1: impl AsRef<Path>,
    dir2: impl AsRef<Path>,
    dir3: impl AsRef<Path>,
    file: impl AsRef<Path>,
) -> PathBuf {
    join2(join3(dir1, dir2, dir3), file)
}

/// Everything after the last `/`, or the whole string if there is none.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// `file` with `prefix` put in front of its base name.
pub fn prefixed_sibling(file: &Path, prefix: &str) -> Result<PathBuf, Error> {
    let name = file
        .file_name()
        .ok_or_else(|| Error::UnrecognizedFileName(file.to_string_lossy().into_owned()))?;
    let mut sibling = OsString::from(prefix);
    sibling.push(name);
    Ok(match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => join2(parent, sibling),
        _ => PathBuf::from(sibling),
    })
}

/// Whether `name` looks like a spool entry created by UUCP.
///
/// Accepts `C.`, `D.`, `X.` and `TM.` prefixes followed by at least one printable character
/// and no `/`. Names coming from a remote system must pass this check before they are used to
/// build a path.
pub fn is_spool_file(name: &str) -> bool {
    let rest = if let Some(rest) = name.strip_prefix("TM.") {
        rest
    } else {
        match name.as_bytes() {
            [b'C' | b'D' | b'X', b'.', ..] => &name[2..],
            _ => return false,
        }
    };
    !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_graphic() && b != b'/')
}

/// Reject system names that could not be used as a single directory component.
pub fn check_system_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name.starts_with('.')
        || !name.bytes().all(|b| b.is_ascii_graphic() && b != b'/')
    {
        return Err(Error::BadSystemName(name.to_string()));
    }
    Ok(())
}

/// First `max` characters of `name` (all of it for `None`).
pub fn truncated(name: &str, max: Option<usize>) -> &str {
    match max {
        Some(max) => match name.char_indices().nth(max) {
            Some((idx, _)) => &name[..idx],
            None => name,
        },
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_does_not_double_root_slash() {
        assert_eq!(join2("/", "foo"), PathBuf::from("/foo"));
        assert_eq!(join2("/var/spool", "foo"), PathBuf::from("/var/spool/foo"));
        assert_eq!(join3("/", "sys", "C.x"), PathBuf::from("/sys/C.x"));
        assert_eq!(
            join4("/spool", "sys", "foo", "C.x"),
            PathBuf::from("/spool/sys/foo/C.x")
        );
    }

    #[test]
    fn join_never_replaces_directory() {
        // Path::join would return "/etc/passwd" here
        assert_eq!(
            join2("/var/spool", "/etc/passwd"),
            PathBuf::from("/var/spool//etc/passwd")
        );
        assert!(join2("/var/spool", "/etc/passwd").starts_with("/var/spool"));
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("foo/X./X.fooA0001"), "X.fooA0001");
        assert_eq!(base_name("X.fooA0001"), "X.fooA0001");
        assert_eq!(base_name("dir/"), "");
    }

    #[test]
    fn sibling_names() {
        assert_eq!(
            prefixed_sibling(Path::new("/spool/X./X.fooA0001"), "L").unwrap(),
            PathBuf::from("/spool/X./LX.fooA0001")
        );
        assert_eq!(
            prefixed_sibling(Path::new("X.fooA0001"), "L").unwrap(),
            PathBuf::from("LX.fooA0001")
        );
        assert!(prefixed_sibling(Path::new("/"), "L").is_err());
    }

    #[test]
    fn spool_file_prefixes() {
        assert!(is_spool_file("C.fooA0001"));
        assert!(is_spool_file("D.local7A0001"));
        assert!(is_spool_file("X.fooA0001"));
        assert!(is_spool_file("TM.12345.000"));
        assert!(!is_spool_file("C."));
        assert!(!is_spool_file("E.foo"));
        assert!(!is_spool_file("TMP0000001234"));
        assert!(!is_spool_file("../../etc/passwd"));
        assert!(!is_spool_file("C./../../etc/passwd"));
        assert!(!is_spool_file("D.foo bar"));
        assert!(!is_spool_file(""));
    }

    #[test]
    fn system_names() {
        assert!(check_system_name("foo").is_ok());
        assert!(check_system_name("foo.bar-baz").is_ok());
        assert!(check_system_name("").is_err());
        assert!(check_system_name("..").is_err());
        assert!(check_system_name(".hidden").is_err());
        assert!(check_system_name("a/b").is_err());
        assert!(check_system_name("a b").is_err());
    }

    #[test]
    fn truncation() {
        assert_eq!(truncated("verylongname", Some(7)), "verylon");
        assert_eq!(truncated("foo", Some(7)), "foo");
        assert_eq!(truncated("verylongname", None), "verylongname");
    }
}
