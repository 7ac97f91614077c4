//! Pipeline Error Types
//!
//! Only failures that make a whole pass meaningless are errors. Anything
//! that goes wrong with a single input is recorded in the ledger instead.

use derive_more::{Display, Error};

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The corpus definition cannot be turned into a pipeline.
    #[display("invalid corpus configuration")]
    Configuration,
    /// The source tree could not be made available (missing directory,
    /// unreadable or corrupt archive).
    #[display("failed to acquire corpus source")]
    Setup,
    /// The source tree could not be listed completely.
    #[display("failed to enumerate corpus source")]
    Enumeration,
    #[display("ledger error")]
    Ledger,
    /// A checkpoint could not be committed after every retry.
    #[display("checkpoint commit failed")]
    Commit,
    #[display("corpus has not been fully processed: {_0}")]
    NotDone(#[error(not(source))] String),
    #[display("failed to export artifacts")]
    Export,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Ledger | ErrorKind::Commit | ErrorKind::Export)
    }
}
