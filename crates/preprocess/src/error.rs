//! Preprocess Error Types
//!
//! These cover building a preprocessing chain. Failures of a step while it
//! processes a file are not errors; they are reported as [`Failure`] values.
//!
//! [`Failure`]: crate::Failure

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("unknown preprocessing step: {_0}")]
    UnknownStep(#[error(not(source))] String),
    #[display("preprocessing step registered twice: {_0}")]
    DuplicateStep(#[error(not(source))] String),
    #[display("no preprocessing steps given")]
    EmptyChain,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
