//! Catalogue Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A catalogue error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalogue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored or supplied value could not be converted.
    #[display("invalid data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A cover name that would escape the cover directory.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidData("authors").to_string(), "invalid data: authors");
        assert_eq!(ErrorKind::InvalidPath(PathBuf::from("../x.jpg")).to_string(), "invalid path: ../x.jpg");
        assert_eq!(ErrorKind::NotFound("book 7".to_string()).to_string(), "not found: book 7");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Io.is_retryable());
        assert!(!ErrorKind::Database.is_retryable());
    }
}
