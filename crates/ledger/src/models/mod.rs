mod artifact;
mod corpus;
mod entry;

pub use self::artifact::Artifact;
pub(crate) use self::artifact::ArtifactRow;
pub use self::corpus::{CorpusRecord, CorpusState, CorpusSummary};
pub(crate) use self::corpus::CorpusRow;
pub use self::entry::{Attempt, Batch, CommitSummary, EntryOutcome, LedgerEntry};
pub(crate) use self::entry::EntryRow;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

pub(crate) fn to_timestamp(value: UtcDateTime) -> i64 {
    value.unix_timestamp()
}

pub(crate) fn from_timestamp(value: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn to_i64<T: TryInto<i64>>(value: T, field: &'static str) -> Result<i64>
where
    T::Error: std::error::Error + Send + Sync + 'static,
{
    value.try_into().or_raise(|| ErrorKind::InvalidData(field))
}
