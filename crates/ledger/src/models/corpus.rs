use super::from_timestamp;
use crate::error::Error;
use time::UtcDateTime;

/// A registered corpus identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusRecord {
    pub id: String,
    /// Configured name at registration time. Informational only: the same
    /// name may map to several identities over time.
    pub name: String,
    /// Canonical JSON of the definition the identity was derived from.
    pub definition: String,
    pub registered_at: UtcDateTime,
    pub done_at: Option<UtcDateTime>,
}
impl CorpusRecord {
    pub fn is_done(&self) -> bool {
        self.done_at.is_some()
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CorpusRow {
    id: String,
    name: String,
    definition: String,
    registered_at: i64,
    done_at: Option<i64>,
}
impl TryFrom<CorpusRow> for CorpusRecord {
    type Error = Error;
    fn try_from(row: CorpusRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            definition: row.definition,
            registered_at: from_timestamp(row.registered_at, "registration date")?,
            done_at: row.done_at.map(|ts| from_timestamp(ts, "completion date")).transpose()?,
        })
    }
}

/// Lifecycle of a corpus. `Done` is terminal until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusState {
    NotStarted,
    InProgress,
    Done,
}
impl CorpusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusState::NotStarted => "not started",
            CorpusState::InProgress => "in progress",
            CorpusState::Done => "done",
        }
    }
}

/// Aggregate counts over the ledger and artifacts of one corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusSummary {
    pub produced: u64,
    pub bad_input: u64,
    pub internal: u64,
    pub decode_skipped: u64,
    pub artifacts: u64,
    pub failed_artifacts: u64,
    pub done: bool,
}
impl CorpusSummary {
    /// Number of ledger entries.
    pub fn entries(&self) -> u64 {
        self.produced + self.bad_input + self.internal + self.decode_skipped
    }

    pub fn state(&self) -> CorpusState {
        match (self.done, self.entries()) {
            (true, _) => CorpusState::Done,
            (false, 0) => CorpusState::NotStarted,
            (false, _) => CorpusState::InProgress,
        }
    }
}
