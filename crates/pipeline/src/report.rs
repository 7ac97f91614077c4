use grist_ledger::{Attempt, CommitSummary, EntryOutcome};
use std::time::Duration;

/// Counts for one pass over one corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub corpus: String,
    pub id: String,
    /// Inputs matching the inclusion pattern.
    pub enumerated: u64,
    /// Inputs without a ledger entry, handed to workers.
    pub dispatched: u64,
    /// Inputs whose attempt completed, whatever the outcome.
    pub processed: u64,
    pub succeeded: u64,
    pub bad_input: u64,
    pub internal: u64,
    pub decode_skipped: u64,
    pub artifacts_written: u64,
    /// Artifacts whose content hash was already stored.
    pub artifacts_deduplicated: u64,
    pub checkpoints: u64,
    /// The corpus was done before this pass started; nothing was enumerated.
    pub already_done: bool,
    pub done: bool,
    pub elapsed: Duration,
}

impl Report {
    pub(crate) fn new(corpus: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            corpus: corpus.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, attempt: &Attempt) {
        self.processed += 1;
        match attempt.entry.outcome {
            EntryOutcome::Produced => self.succeeded += 1,
            EntryOutcome::BadInput => self.bad_input += 1,
            EntryOutcome::Internal => self.internal += 1,
            EntryOutcome::DecodeSkipped => self.decode_skipped += 1,
        }
    }

    pub(crate) fn checkpoint(&mut self, summary: &CommitSummary) {
        self.checkpoints += 1;
        self.artifacts_written += summary.artifacts_written;
        self.artifacts_deduplicated += summary.artifacts_deduplicated;
    }

    /// Inputs that were rejected or faulted.
    pub fn failed(&self) -> u64 {
        self.bad_input + self.internal
    }
}
