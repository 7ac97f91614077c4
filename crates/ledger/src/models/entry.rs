use super::{Artifact, from_timestamp};
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use time::UtcDateTime;

/// What happened when an input was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryOutcome {
    /// Preprocessing succeeded with zero or more outputs.
    Produced,
    /// Preprocessing rejected the input; one failed artifact was stored.
    BadInput,
    /// Preprocessing faulted; one failed artifact was stored.
    Internal,
    /// The input could not be read or decoded as UTF-8; nothing was stored.
    DecodeSkipped,
}
impl EntryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryOutcome::Produced => "produced",
            EntryOutcome::BadInput => "bad_input",
            EntryOutcome::Internal => "internal",
            EntryOutcome::DecodeSkipped => "decode_skipped",
        }
    }
}
impl Display for EntryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
impl FromStr for EntryOutcome {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "produced" => EntryOutcome::Produced,
            "bad_input" => EntryOutcome::BadInput,
            "internal" => EntryOutcome::Internal,
            "decode_skipped" => EntryOutcome::DecodeSkipped,
            _ => exn::bail!(ErrorKind::InvalidData("entry outcome")),
        })
    }
}

/// Record that an input has been attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub relpath: String,
    pub outcome: EntryOutcome,
    pub artifact_count: u32,
    pub attempted_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    relpath: String,
    outcome: String,
    artifact_count: i64,
    attempted_at: i64,
}
impl TryFrom<EntryRow> for LedgerEntry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Self {
            relpath: row.relpath,
            outcome: row.outcome.parse()?,
            artifact_count: u32::try_from(row.artifact_count).or_raise(|| ErrorKind::InvalidData("artifact count"))?,
            attempted_at: from_timestamp(row.attempted_at, "attempt date")?,
        })
    }
}

/// A ledger entry together with the artifacts produced by the same attempt.
/// The two are always committed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub entry: LedgerEntry,
    pub artifacts: Vec<Artifact>,
}
impl Attempt {
    pub fn new(relpath: impl Into<String>, outcome: EntryOutcome, artifacts: Vec<Artifact>) -> Self {
        Self {
            entry: LedgerEntry {
                relpath: relpath.into(),
                outcome,
                artifact_count: u32::try_from(artifacts.len()).unwrap_or(u32::MAX),
                attempted_at: UtcDateTime::now(),
            },
            artifacts,
        }
    }
}

/// Attempts waiting to be committed in one transaction, optionally together
/// with the done marker of the corpus.
#[derive(Debug, Default)]
pub struct Batch {
    attempts: Vec<Attempt>,
    done: bool,
}
impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Set the done marker in the same transaction as the attempts.
    pub fn mark_done(&mut self) {
        self.done = true;
    }

    pub fn marks_done(&self) -> bool {
        self.done
    }

    pub fn clear(&mut self) {
        self.attempts.clear();
        self.done = false;
    }
}

/// Result of committing a [`Batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub entries: u64,
    pub artifacts_written: u64,
    /// Artifacts whose hash was already stored.
    pub artifacts_deduplicated: u64,
    /// This commit set the done marker.
    pub marked_done: bool,
}
