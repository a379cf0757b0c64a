//! Archive Error Types
//!
//! Cancellation is not an error: see [`Outcome`](crate::Outcome).

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archive or one of its records is not in a format we understand.
    /// Don't retry with the same input.
    #[display("file not recognized: {_0}")]
    Format(#[error(not(source))] String),
    #[display("unsupported archive version: {_0}")]
    UnsupportedVersion(#[error(not(source))] u32),
    /// No reader or writer exists for the requested record type and encoding.
    #[display("unsupported: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// The catalogue or the cover storage failed.
    #[display("storage error")]
    Storage,
    /// Reading or writing the archive container (or a temporary file) failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Storage | ErrorKind::Io)
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        ErrorKind::Format(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::UnsupportedVersion(9).to_string(), "unsupported archive version: 9");
        assert_eq!(ErrorKind::format("missing header").to_string(), "file not recognized: missing header");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Io.is_retryable());
        assert!(ErrorKind::Storage.is_retryable());
        assert!(!ErrorKind::Format(String::new()).is_retryable());
        assert!(!ErrorKind::UnsupportedVersion(0).is_retryable());
        assert!(!ErrorKind::Unsupported(String::new()).is_retryable());
    }
}
