//! Ledger entries, corpus markers and artifacts.
//!
//! These live in one repository because they are only ever consistent
//! together: an artifact must never be visible without the ledger entry of
//! the attempt that produced it, and the done marker is only meaningful
//! relative to the set of entries.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    Artifact, ArtifactRow, Attempt, Batch, CommitSummary, CorpusRecord, CorpusRow, CorpusState, CorpusSummary,
    EntryOutcome, EntryRow, LedgerEntry,
};
use exn::{OptionExt, ResultExt};
use sqlx::{SqliteExecutor, SqlitePool};
use std::collections::HashSet;
use time::UtcDateTime;
use tracing::instrument;

/// Durable record of attempted inputs and stored artifacts, namespaced by
/// corpus identity.
///
/// Only the pipeline coordinator writes through a `Ledger`; concurrent
/// coordinators on the same corpus are not guarded against.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}
impl From<&Database> for Ledger {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Corpora
    // =========================================================================

    /// Register a corpus identity with the definition it was derived from.
    ///
    /// Registering an identity that already exists is a no-op, provided the
    /// stored definition is identical. A differing definition means the
    /// identity no longer describes the work recorded under it, and is
    /// rejected with [`ErrorKind::IdentityMismatch`].
    #[instrument(skip(self, definition))]
    pub async fn register(&self, id: &str, name: &str, definition: &str) -> Result<CorpusRecord> {
        if let Some(existing) = self.corpus(id).await? {
            if existing.definition != definition {
                exn::bail!(ErrorKind::IdentityMismatch(id.to_string()));
            }
            return Ok(existing);
        }
        let previous: Vec<CorpusRow> = sqlx::query_as(include_str!("../queries/list_corpora_by_name.sql"))
            .bind(name)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for row in previous {
            let previous = CorpusRecord::try_from(row)?;
            tracing::warn!(
                corpus = name,
                previous = %previous.id,
                "Corpus definition changed; work recorded under the previous identity will not be reused"
            );
        }
        sqlx::query(include_str!("../queries/insert_corpus.sql"))
            .bind(id)
            .bind(name)
            .bind(definition)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::info!(corpus = name, id, "Registered corpus");
        self.require(id).await
    }

    pub async fn corpus(&self, id: &str) -> Result<Option<CorpusRecord>> {
        let row: Option<CorpusRow> = sqlx::query_as(include_str!("../queries/get_corpus.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CorpusRecord::try_from).transpose()
    }

    async fn require(&self, id: &str) -> Result<CorpusRecord> {
        self.corpus(id).await?.ok_or_raise(|| ErrorKind::UnknownCorpus(id.to_string()))
    }

    /// All registered corpora, ordered by name.
    pub async fn corpora(&self) -> Result<Vec<CorpusRecord>> {
        let rows: Vec<CorpusRow> = sqlx::query_as(include_str!("../queries/list_corpora.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CorpusRecord::try_from).collect()
    }

    /// Whether the corpus has been marked done. Unregistered corpora are not.
    pub async fn is_done(&self, id: &str) -> Result<bool> {
        Ok(self.corpus(id).await?.is_some_and(|corpus| corpus.is_done()))
    }

    pub async fn state(&self, id: &str) -> Result<CorpusState> {
        if self.corpus(id).await?.is_none() {
            return Ok(CorpusState::NotStarted);
        }
        Ok(self.summary(id).await?.state())
    }

    pub async fn summary(&self, id: &str) -> Result<CorpusSummary> {
        let mut summary = CorpusSummary {
            done: self.is_done(id).await?,
            ..CorpusSummary::default()
        };
        let outcomes: Vec<(String, i64)> = sqlx::query_as(include_str!("../queries/count_outcomes.sql"))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for (outcome, count) in outcomes {
            let count = u64::try_from(count).or_raise(|| ErrorKind::InvalidData("entry count"))?;
            match outcome.parse::<EntryOutcome>()? {
                EntryOutcome::Produced => summary.produced = count,
                EntryOutcome::BadInput => summary.bad_input = count,
                EntryOutcome::Internal => summary.internal = count,
                EntryOutcome::DecodeSkipped => summary.decode_skipped = count,
            }
        }
        let (artifacts, failed): (i64, i64) = sqlx::query_as(include_str!("../queries/count_artifacts.sql"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        summary.artifacts = u64::try_from(artifacts).or_raise(|| ErrorKind::InvalidData("artifact count"))?;
        summary.failed_artifacts = u64::try_from(failed).or_raise(|| ErrorKind::InvalidData("artifact count"))?;
        Ok(summary)
    }

    /// Clear every ledger entry, every artifact and the done marker of a
    /// corpus, in one transaction. Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn reset(&self, id: &str) -> Result<u64> {
        self.require(id).await?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let entries = sqlx::query(include_str!("../queries/delete_entries.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        let artifacts = sqlx::query(include_str!("../queries/delete_artifacts.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        sqlx::query(include_str!("../queries/clear_done.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::info!(id, entries, artifacts, "Reset corpus");
        Ok(entries)
    }

    // =========================================================================
    // Ledger entries
    // =========================================================================

    pub async fn contains(&self, id: &str, relpath: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(include_str!("../queries/contains_entry.sql"))
            .bind(id)
            .bind(relpath)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Record an attempt outside of a batch. Recording the same relpath
    /// twice keeps the first entry.
    pub async fn record(&self, id: &str, entry: &LedgerEntry) -> Result<()> {
        insert_entry(&self.pool, id, entry).await?;
        Ok(())
    }

    /// Every relpath attempted for a corpus.
    pub async fn attempted(&self, id: &str) -> Result<HashSet<String>> {
        let relpaths: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_attempted.sql"))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(relpaths.into_iter().collect())
    }

    pub async fn entries(&self, id: &str) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_entries.sql"))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    /// Commit a batch of attempts in one transaction: all entries and
    /// artifacts become visible together, or none do. A batch that
    /// [marks the corpus done](Batch::mark_done) sets the marker in the same
    /// transaction.
    #[instrument(skip(self, batch), fields(attempts = batch.len(), done = batch.marks_done()))]
    pub async fn commit(&self, id: &str, batch: &Batch) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();
        if batch.is_empty() && !batch.marks_done() {
            return Ok(summary);
        }
        if batch.marks_done() {
            self.require(id).await?;
        }
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for Attempt { entry, artifacts } in batch.attempts() {
            if insert_entry(&mut *tx, id, entry).await? {
                summary.entries += 1;
            }
            for artifact in artifacts {
                if insert_artifact(&mut *tx, id, artifact).await? {
                    summary.artifacts_written += 1;
                } else {
                    summary.artifacts_deduplicated += 1;
                }
            }
        }
        if batch.marks_done() {
            summary.marked_done = set_done(&mut *tx, id).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(summary)
    }

    // =========================================================================
    // Artifacts
    // =========================================================================

    /// Store an artifact outside of a batch.
    ///
    /// Returns `true` if an artifact with the same hash already existed, in
    /// which case nothing was written.
    pub async fn put(&self, id: &str, artifact: &Artifact) -> Result<bool> {
        Ok(!insert_artifact(&self.pool, id, artifact).await?)
    }

    pub async fn artifact(&self, id: &str, hash: &str) -> Result<Option<Artifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(include_str!("../queries/get_artifact.sql"))
            .bind(id)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Artifact::try_from).transpose()
    }

    /// Hex identifiers of every stored artifact, sorted.
    pub async fn artifact_hashes(&self, id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(include_str!("../queries/list_artifact_hashes.sql"))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Every stored artifact, ordered by relpath and index.
    pub async fn artifacts(&self, id: &str) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(include_str!("../queries/list_artifacts.sql"))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Artifact::try_from).collect()
    }
}

/// Returns `true` if the marker was not already set.
async fn set_done<'e>(executor: impl SqliteExecutor<'e>, id: &str) -> Result<bool> {
    let result = sqlx::query(include_str!("../queries/mark_done.sql"))
        .bind(UtcDateTime::now().unix_timestamp())
        .bind(id)
        .execute(executor)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected() > 0)
}

/// Returns `true` if a new entry was inserted.
async fn insert_entry<'e>(executor: impl SqliteExecutor<'e>, id: &str, entry: &LedgerEntry) -> Result<bool> {
    let result = sqlx::query(include_str!("../queries/insert_entry.sql"))
        .bind(id)
        .bind(entry.relpath.as_str())
        .bind(entry.outcome.as_str())
        .bind(i64::from(entry.artifact_count))
        .bind(entry.attempted_at.unix_timestamp())
        .execute(executor)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected() > 0)
}

/// Returns `true` if the artifact was written, `false` if its hash was
/// already stored.
async fn insert_artifact<'e>(executor: impl SqliteExecutor<'e>, id: &str, artifact: &Artifact) -> Result<bool> {
    let row = ArtifactRow::try_from(artifact)?;
    let result = sqlx::query(include_str!("../queries/insert_artifact.sql"))
        .bind(id)
        .bind(row.content_hash)
        .bind(row.relpath)
        .bind(row.artifact_index)
        .bind(row.input_hash)
        .bind(row.char_count)
        .bind(row.line_count)
        .bind(row.text)
        .bind(row.success)
        .bind(row.failure_kind)
        .bind(row.duration_ms)
        .bind(row.created_at)
        .execute(executor)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grist_preprocess::FailureKind;
    use std::time::Duration;

    const ID: &str = "6c0ab8c4b2c5aa3a9d1c0f5e3f7f1f7b0b1d6a4e3c2b1a09f8e7d6c5b4a39281";
    const DEFINITION: &str = r#"{"source":{"directory":"/srv/corpus"},"pattern":null,"steps":["reject_empty"]}"#;

    async fn ledger() -> Ledger {
        let db = Database::connect_in_memory().await.unwrap();
        let ledger = Ledger::from(&db);
        ledger.register(ID, "corpus", DEFINITION).await.unwrap();
        ledger
    }

    fn artifact(relpath: &str, index: u32, text: &str, failure: Option<FailureKind>) -> Artifact {
        Artifact {
            relpath: relpath.to_string(),
            index,
            hash: format!("hash-of-{text}"),
            input_hash: format!("input-of-{relpath}"),
            char_count: text.chars().count() as u64,
            line_count: text.split('\n').count() as u64,
            text: text.to_string(),
            failure,
            duration: Duration::from_millis(3),
            created_at: UtcDateTime::from_unix_timestamp(1_767_225_600).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let ledger = ledger().await;
        let record = ledger.register(ID, "corpus", DEFINITION).await.unwrap();
        assert_eq!(record.definition, DEFINITION);
        assert!(!record.is_done());
        assert_eq!(ledger.corpora().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_identity_mismatch() {
        let ledger = ledger().await;
        let err = ledger.register(ID, "corpus", "{}").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::IdentityMismatch(id) if id == ID));
    }

    #[tokio::test]
    async fn test_record_and_contains() {
        let ledger = ledger().await;
        assert!(!ledger.contains(ID, "a.src").await.unwrap());
        let attempt = Attempt::new("a.src", EntryOutcome::DecodeSkipped, Vec::new());
        ledger.record(ID, &attempt.entry).await.unwrap();
        ledger.record(ID, &attempt.entry).await.unwrap();
        assert!(ledger.contains(ID, "a.src").await.unwrap());
        assert_eq!(ledger.attempted(ID).await.unwrap(), HashSet::from(["a.src".to_string()]));
        assert_eq!(ledger.entries(ID).await.unwrap()[0].outcome, EntryOutcome::DecodeSkipped);
    }

    #[tokio::test]
    async fn test_put_is_content_addressed() {
        let ledger = ledger().await;
        assert!(!ledger.put(ID, &artifact("a.src", 0, "X", None)).await.unwrap());
        assert!(ledger.put(ID, &artifact("b.src", 0, "X", None)).await.unwrap());
        let stored = ledger.artifact(ID, "hash-of-X").await.unwrap().unwrap();
        assert_eq!(stored.relpath, "a.src");
        assert_eq!(ledger.artifact_hashes(ID).await.unwrap(), vec!["hash-of-X"]);
    }

    #[tokio::test]
    async fn test_commit_batch() {
        let ledger = ledger().await;
        let mut batch = Batch::new();
        batch.push(Attempt::new("a.src", EntryOutcome::Produced, vec![artifact("a.src", 0, "X", None)]));
        batch.push(Attempt::new(
            "b.src",
            EntryOutcome::Produced,
            vec![artifact("b.src", 0, "Y", None), artifact("b.src", 1, "X", None)],
        ));
        batch.push(Attempt::new(
            "c.src",
            EntryOutcome::BadInput,
            vec![artifact("c.src", 0, "no content", Some(FailureKind::BadInput))],
        ));
        let summary = ledger.commit(ID, &batch).await.unwrap();
        assert_eq!(
            summary,
            CommitSummary {
                entries: 3,
                artifacts_written: 3,
                artifacts_deduplicated: 1,
                marked_done: false,
            }
        );

        let summary = ledger.summary(ID).await.unwrap();
        assert_eq!(summary.produced, 2);
        assert_eq!(summary.bad_input, 1);
        assert_eq!(summary.artifacts, 3);
        assert_eq!(summary.failed_artifacts, 1);
        assert_eq!(summary.state(), CorpusState::InProgress);

        let artifacts = ledger.artifacts(ID).await.unwrap();
        let relpaths: Vec<_> = artifacts.iter().map(|a| (a.relpath.as_str(), a.index)).collect();
        assert_eq!(relpaths, vec![("a.src", 0), ("b.src", 0), ("c.src", 0)]);
    }

    #[tokio::test]
    async fn test_commit_empty_batch() {
        let ledger = ledger().await;
        assert_eq!(ledger.commit(ID, &Batch::new()).await.unwrap(), CommitSummary::default());
    }

    #[tokio::test]
    async fn test_commit_marks_done_atomically() {
        let ledger = ledger().await;
        let mut batch = Batch::new();
        batch.push(Attempt::new("a.src", EntryOutcome::Produced, vec![artifact("a.src", 0, "X", None)]));
        batch.mark_done();
        let summary = ledger.commit(ID, &batch).await.unwrap();
        assert!(summary.marked_done);
        assert_eq!(summary.entries, 1);
        assert!(ledger.is_done(ID).await.unwrap());
        assert!(ledger.contains(ID, "a.src").await.unwrap());

        // The marker alone commits too, but never sets it twice.
        let mut marker = Batch::new();
        marker.mark_done();
        assert!(!ledger.commit(ID, &marker).await.unwrap().marked_done);
    }

    #[tokio::test]
    async fn test_commit_done_unknown_corpus() {
        let ledger = ledger().await;
        let mut batch = Batch::new();
        batch.push(Attempt::new("a.src", EntryOutcome::Produced, vec![artifact("a.src", 0, "X", None)]));
        batch.mark_done();
        let err = ledger.commit("unknown", &batch).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownCorpus(_)));
        assert!(ledger.attempted("unknown").await.unwrap().is_empty());
    }

    /// Commit nothing but the done marker.
    async fn mark_done(ledger: &Ledger, id: &str) -> Result<bool> {
        let mut batch = Batch::new();
        batch.mark_done();
        Ok(ledger.commit(id, &batch).await?.marked_done)
    }

    #[tokio::test]
    async fn test_mark_done_once() {
        let ledger = ledger().await;
        assert_eq!(ledger.state(ID).await.unwrap(), CorpusState::NotStarted);
        assert!(!ledger.is_done(ID).await.unwrap());
        assert!(mark_done(&ledger, ID).await.unwrap());
        assert!(!mark_done(&ledger, ID).await.unwrap());
        assert!(ledger.is_done(ID).await.unwrap());
        assert_eq!(ledger.state(ID).await.unwrap(), CorpusState::Done);
    }

    #[tokio::test]
    async fn test_mark_done_unknown_corpus() {
        let ledger = ledger().await;
        let err = mark_done(&ledger, "unknown").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownCorpus(_)));
        assert!(!ledger.is_done("unknown").await.unwrap());
        assert_eq!(ledger.state("unknown").await.unwrap(), CorpusState::NotStarted);
    }

    #[tokio::test]
    async fn test_reset() {
        let ledger = ledger().await;
        let mut batch = Batch::new();
        batch.push(Attempt::new("a.src", EntryOutcome::Produced, vec![artifact("a.src", 0, "X", None)]));
        batch.mark_done();
        ledger.commit(ID, &batch).await.unwrap();

        assert_eq!(ledger.reset(ID).await.unwrap(), 1);
        assert!(!ledger.is_done(ID).await.unwrap());
        assert!(ledger.attempted(ID).await.unwrap().is_empty());
        assert!(ledger.artifact_hashes(ID).await.unwrap().is_empty());
        // A reset starts a new lifetime: the marker can be set again.
        assert!(mark_done(&ledger, ID).await.unwrap());
    }
}
