use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("failed to load configuration")]
    Config,
    #[display("failed to open ledger database")]
    Database,
    #[display("ledger query failed")]
    Ledger,
    #[display("pass over corpus {_0} failed")]
    Pipeline(#[error(not(source))] String),
    #[display("failed to export corpus {_0}")]
    Export(#[error(not(source))] String),
    #[display("corpus {_0} has never been run")]
    NeverRun(#[error(not(source))] String),
}
