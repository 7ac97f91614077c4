//! Ledger Error Types

use derive_more::{Display, Error};

/// A ledger error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored value could not be converted to or from its model.
    #[display("invalid ledger data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// A corpus identity is already registered with a different definition.
    #[display("corpus {_0} is registered with a different definition")]
    IdentityMismatch(#[error(not(source))] String),
    #[display("corpus not registered: {_0}")]
    UnknownCorpus(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// SQLite reports a locked or busy database as a plain database error, so
    /// those are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Database)
    }
}
