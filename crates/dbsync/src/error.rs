//! Database access errors.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Misuse of the transaction API that is reported to the caller rather than
/// asserted on.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[display("a transaction has already been started")]
    AlreadyStarted,
    #[display("write attempted inside a shared transaction")]
    InsideSharedTransaction,
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Opening the database failed, or kept failing with "busy" until the
    /// retry budget ran out.
    #[display("unable to open database")]
    Open,
    #[display("database error")]
    Database,
    /// A single-value query returned no rows.
    #[display("query returned no rows")]
    NoRows,
    #[display("transaction error: {_0}")]
    Transaction(#[error(not(source))] TransactionError),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Open)
    }
}
