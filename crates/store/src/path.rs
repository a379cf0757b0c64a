//! Cover file names.

use std::path::PathBuf;

use crate::error::{ErrorKind, Result};

/// Longest cover name accepted.
const MAX_NAME_LEN: usize = 255;

/// Checks that `name` is a plain file name directly inside the cover
/// directory and returns it unchanged.
///
/// Names come from archive entries and are untrusted. A valid name is a
/// single path segment without separators or control characters, and does
/// not start with a dot (which also rules out `.` and `..`).
///
/// # Examples
///
/// ```
/// use folio_store::validate_cover_name;
/// assert!(validate_cover_name("0b0e8f34-6f0e-4f4e-9d5c-3cb1d8a0a001_1.jpg").is_ok());
/// assert!(validate_cover_name("../etc/passwd").is_err());
/// assert!(validate_cover_name("covers/front.jpg").is_err());
/// ```
pub fn validate(name: &str) -> Result<&str> {
    let plain = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name.chars().any(|c| matches!(c, '/' | '\\') || c.is_control());
    match plain {
        true => Ok(name),
        false => exn::bail!(ErrorKind::InvalidPath(PathBuf::from(name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0b0e8f34-6f0e-4f4e-9d5c-3cb1d8a0a001.jpg")]
    #[case("0b0e8f34-6f0e-4f4e-9d5c-3cb1d8a0a001_1.jpg")]
    #[case("scan of the back cover.png")]
    fn test_valid_names(#[case] name: &str) {
        assert_eq!(validate(name).unwrap(), name);
    }

    #[rstest]
    #[case::empty("")]
    #[case::current(".")]
    #[case::parent("..")]
    #[case::hidden(".cover.jpg")]
    #[case::traversal("../cover.jpg")]
    #[case::nested("covers/cover.jpg")]
    #[case::backslash("covers\\cover.jpg")]
    #[case::absolute("/etc/passwd")]
    #[case::null_byte("a\0b.jpg")]
    #[case::newline("a\nb.jpg")]
    fn test_invalid_names(#[case] name: &str) {
        let err = validate(name).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidPath(PathBuf::from(name)));
    }

    #[test]
    fn test_overlong_name() {
        let name = format!("{}.jpg", "x".repeat(MAX_NAME_LEN));
        assert!(validate(&name).is_err());
    }
}
