//! Periodic commits of completed work.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use grist_ledger::{Attempt, Batch, CommitSummary, Ledger};
use std::time::{Duration, Instant};

/// Accumulates finished attempts and commits them to the ledger as one
/// transaction, at most once per interval.
///
/// Work that was pushed but not yet committed is lost on interruption and
/// redone by the next pass; nothing partial is ever visible.
pub struct Checkpointer<'a> {
    ledger: &'a Ledger,
    corpus: &'a str,
    interval: Duration,
    attempts: u32,
    backoff: Duration,
    pending: Batch,
    last_commit: Instant,
    commits: u64,
}

impl<'a> Checkpointer<'a> {
    pub fn new(ledger: &'a Ledger, corpus: &'a str, interval: Duration) -> Self {
        Self {
            ledger,
            corpus,
            interval,
            attempts: 3,
            backoff: Duration::from_millis(100),
            pending: Batch::new(),
            last_commit: Instant::now(),
            commits: 0,
        }
    }

    /// Retry a failed commit up to `attempts` times in total, waiting
    /// `backoff` before the first retry and doubling the wait after each.
    pub fn with_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn push(&mut self, attempt: Attempt) {
        self.pending.push(attempt);
    }

    /// Set the done marker with the next commit.
    pub fn mark_done(&mut self) {
        self.pending.mark_done();
    }

    /// Attempts waiting for the next commit.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn is_due(&self) -> bool {
        !self.pending.is_empty() && self.last_commit.elapsed() >= self.interval
    }

    /// Commit if the interval since the last commit has elapsed.
    pub async fn maybe_flush(&mut self) -> Result<Option<CommitSummary>> {
        if !self.is_due() {
            return Ok(None);
        }
        self.flush().await
    }

    /// Commit everything pending now.
    ///
    /// The pending batch is only dropped once it is committed, so every retry
    /// commits exactly the same work. Returns `None` if nothing was pending.
    pub async fn flush(&mut self) -> Result<Option<CommitSummary>> {
        if self.pending.is_empty() && !self.pending.marks_done() {
            return Ok(None);
        }
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.ledger.commit(self.corpus, &self.pending).await {
                Ok(summary) => {
                    tracing::debug!(
                        corpus = self.corpus,
                        entries = summary.entries,
                        written = summary.artifacts_written,
                        deduplicated = summary.artifacts_deduplicated,
                        done = summary.marked_done,
                        "Checkpoint committed"
                    );
                    self.pending.clear();
                    self.last_commit = Instant::now();
                    self.commits += 1;
                    return Ok(Some(summary));
                },
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(corpus = self.corpus, attempt, error = ?e, "Checkpoint commit failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                },
                Err(e) => {
                    tracing::error!(corpus = self.corpus, attempts = attempt, pending = self.pending.len(), "Giving up on checkpoint commit");
                    return Err(e).or_raise(|| ErrorKind::Commit);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grist_ledger::{Database, EntryOutcome};

    const ID: &str = "corpus";

    async fn ledger() -> (Database, Ledger) {
        let db = Database::connect_in_memory().await.unwrap();
        let ledger = Ledger::from(&db);
        ledger.register(ID, "corpus", "{}").await.unwrap();
        (db, ledger)
    }

    fn attempt(relpath: &str) -> Attempt {
        Attempt::new(relpath, EntryOutcome::DecodeSkipped, Vec::new())
    }

    #[tokio::test]
    async fn test_interval_gates_commits() {
        let (_db, ledger) = ledger().await;
        let mut checkpointer = Checkpointer::new(&ledger, ID, Duration::from_secs(3600));
        checkpointer.push(attempt("a.src"));
        assert!(!checkpointer.is_due());
        assert_eq!(checkpointer.maybe_flush().await.unwrap(), None);
        assert!(!ledger.contains(ID, "a.src").await.unwrap());

        let summary = checkpointer.flush().await.unwrap().unwrap();
        assert_eq!(summary.entries, 1);
        assert_eq!(checkpointer.pending(), 0);
        assert_eq!(checkpointer.commits(), 1);
        assert!(ledger.contains(ID, "a.src").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_interval_commits_every_push() {
        let (_db, ledger) = ledger().await;
        let mut checkpointer = Checkpointer::new(&ledger, ID, Duration::ZERO);
        assert_eq!(checkpointer.maybe_flush().await.unwrap(), None);
        for relpath in ["a.src", "b.src"] {
            checkpointer.push(attempt(relpath));
            assert!(checkpointer.maybe_flush().await.unwrap().is_some());
        }
        assert_eq!(checkpointer.commits(), 2);
        assert_eq!(ledger.attempted(ID).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_done_marker_rides_on_final_flush() {
        let (_db, ledger) = ledger().await;
        let mut checkpointer = Checkpointer::new(&ledger, ID, Duration::from_secs(3600));
        checkpointer.push(attempt("a.src"));
        checkpointer.mark_done();
        assert!(!ledger.is_done(ID).await.unwrap());
        let summary = checkpointer.flush().await.unwrap().unwrap();
        assert!(summary.marked_done);
        assert_eq!(summary.entries, 1);
        assert!(ledger.is_done(ID).await.unwrap());
        assert_eq!(checkpointer.flush().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_done_marker_alone_is_committed() {
        let (_db, ledger) = ledger().await;
        let mut checkpointer = Checkpointer::new(&ledger, ID, Duration::from_secs(3600));
        checkpointer.mark_done();
        assert_eq!(checkpointer.pending(), 0);
        let summary = checkpointer.flush().await.unwrap().unwrap();
        assert!(summary.marked_done);
        assert_eq!(summary.entries, 0);
        assert!(ledger.is_done(ID).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_pending_batch() {
        let (db, ledger) = ledger().await;
        let mut checkpointer = Checkpointer::new(&ledger, ID, Duration::ZERO).with_retries(3, Duration::from_millis(1));
        checkpointer.push(attempt("a.src"));
        checkpointer.push(attempt("b.src"));
        db.close().await;

        let err = checkpointer.flush().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Commit);
        assert_eq!(checkpointer.pending(), 2);
        assert_eq!(checkpointer.commits(), 0);
    }
}
