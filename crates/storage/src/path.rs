//! Path validation and content-addressed layout.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Top-level directory that all content-addressed artifact files live under.
const ARTIFACT_ROOT: &str = "artifact";

/// Validates a relative storage path and returns it in normalized form.
///
/// Storage paths never leave the storage root: `..` components are resolved
/// against the components seen so far and rejected once they would climb above
/// the root. Leading slashes and `.` components are dropped, NUL bytes and
/// platform prefixes are rejected, and a path that normalizes to nothing is
/// invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ferry_storage::validate_path;
///
/// assert_eq!(validate_path("artifact/ab/cdef").unwrap(), Path::new("artifact/ab/cdef"));
/// assert_eq!(validate_path("/artifact/./ab//cdef/").unwrap(), Path::new("artifact/ab/cdef"));
/// assert!(validate_path("artifact/../../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || exn::Exn::from(ErrorKind::InvalidPath(original.to_path_buf()));
    let mut normalized = PathBuf::new();
    for component in original.components() {
        match component {
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => return Err(invalid()),
            Component::Normal(part) => normalized.push(part),
            Component::CurDir | Component::RootDir => {},
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(invalid());
                }
            },
            Component::Prefix(_) => return Err(invalid()),
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(invalid());
    }
    Ok(normalized)
}

/// Content-addressed storage path for an artifact with the given sha256 digest.
///
/// The first two hex characters become a fan-out directory so a single
/// directory never holds every artifact: `artifact/<2 chars>/<remaining 62>`.
///
/// ```
/// use std::path::Path;
/// use ferry_storage::artifact_path;
///
/// let digest = "b5bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b878ae4944c";
/// assert_eq!(
///     artifact_path(digest).unwrap(),
///     Path::new("artifact/b5/bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b878ae4944c"),
/// );
/// ```
pub fn artifact_path(sha256: &str) -> Result<PathBuf> {
    if sha256.len() != 64 || !sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
        exn::bail!(ErrorKind::InvalidDigest(sha256.to_string()));
    }
    let digest = sha256.to_ascii_lowercase();
    let (fanout, rest) = digest.split_at(2);
    Ok([ARTIFACT_ROOT, fanout, rest].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(validate("artifact/ab/cd").unwrap(), Path::new("artifact/ab/cd"));
        assert_eq!(validate("a//b/./c/").unwrap(), Path::new("a/b/c"));
        assert_eq!(validate("/rooted/file").unwrap(), Path::new("rooted/file"));
        assert_eq!(validate("a/b/../c").unwrap(), Path::new("a/c"));
    }

    #[test]
    fn test_escaping_the_root() {
        assert!(validate("../outside").is_err());
        assert!(validate("a/../../outside").is_err());
        assert!(validate("..").is_err());
    }

    #[test]
    fn test_rejects_empty_and_nul() {
        for path in ["", ".", "./", "//", "a\0b"] {
            let err = validate(path).unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidPath(_)), "{path:?} should be rejected");
        }
    }

    #[test]
    fn test_artifact_path_lowercases_digest() {
        let upper = "B5BB9D8014A0F9B1D61E21E796D78DCCDF1352F23CD32812F4850B878AE4944C";
        let path = artifact_path(upper).unwrap();
        assert!(path.starts_with("artifact/b5"));
        assert_eq!(validate(&path).unwrap(), path);
    }

    #[test]
    fn test_artifact_path_rejects_non_digests() {
        assert!(artifact_path("abc").is_err());
        assert!(artifact_path(&"z".repeat(64)).is_err());
    }
}
