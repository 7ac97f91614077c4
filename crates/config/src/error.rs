//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A configuration file passed explicitly does not exist.
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The configuration file extension is not one of toml, yaml or json.
    #[display("unsupported configuration format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The merged configuration could not be deserialized.
    #[display("invalid configuration")]
    Invalid,
    /// A corpus definition failed validation.
    #[display("corpus `{corpus}`: {reason}")]
    InvalidCorpus { corpus: String, reason: String },
    /// No corpus with this name is configured.
    #[display("unknown corpus: {_0}")]
    UnknownCorpus(#[error(not(source))] String),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub(crate) fn invalid_corpus(corpus: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCorpus {
            corpus: corpus.to_string(),
            reason: reason.into(),
        }
    }
}
