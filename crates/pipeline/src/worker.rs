//! Preprocessing of a single input.
//!
//! A worker never fails: whatever happens to its input is described by the
//! [`Attempt`] it returns, so one bad file cannot take down its siblings.

use grist_ledger::{Artifact, Attempt, EntryOutcome};
use grist_preprocess::{Chain, Failure, FailureKind, Source};
use grist_storage::BackendHandle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::UtcDateTime;
use tracing::instrument;

/// Prefix on the text of artifacts whose preprocessing faulted, separating
/// tooling bugs from expected bad input when reading artifacts back.
pub const INTERNAL_ERROR_PREFIX: &str = "!!INTERNAL ERROR!! ";

/// Lowercase hex BLAKE3 digest.
pub(crate) fn digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Content hash of an artifact. A failed artifact's hash also covers its
/// failure kind, so a diagnostic never collides with a successful output
/// of the same text.
pub(crate) fn content_hash(text: &str, failure: Option<FailureKind>) -> String {
    let Some(kind) = failure else {
        return digest(text.as_bytes());
    };
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"failed:");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Read, decode and preprocess one input.
///
/// Reading happens on the async runtime; hashing and preprocessing are
/// CPU-bound and run on the blocking pool.
#[instrument(skip(backend, chain, siblings))]
pub(crate) async fn process(backend: &BackendHandle, chain: &Chain, siblings: &Arc<[String]>, relpath: String) -> Attempt {
    let bytes = match backend.read(Path::new(&relpath)).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(%relpath, error = ?e, "Skipping unreadable input");
            return Attempt::new(relpath, EntryOutcome::DecodeSkipped, Vec::new());
        },
    };
    let input_hash = digest(&bytes);
    let job = Job {
        root: backend.root().to_path_buf(),
        relpath: relpath.clone(),
        siblings: Arc::clone(siblings),
        input_hash: input_hash.clone(),
        chain: chain.clone(),
    };
    match tokio::task::spawn_blocking(move || job.run(bytes)).await {
        Ok(attempt) => attempt,
        // Steps are already isolated by the chain; this is a fault in the
        // worker itself.
        Err(e) => {
            let failure = Failure::internal(format!("worker task failed: {e}"));
            let artifact = failed_artifact(&relpath, &input_hash, failure, Duration::ZERO);
            Attempt::new(relpath, EntryOutcome::Internal, vec![artifact])
        },
    }
}

struct Job {
    root: PathBuf,
    relpath: String,
    siblings: Arc<[String]>,
    input_hash: String,
    chain: Chain,
}

impl Job {
    fn run(self, bytes: Vec<u8>) -> Attempt {
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(relpath = %self.relpath, error = %e.utf8_error(), "Skipping input that is not valid UTF-8");
                return Attempt::new(self.relpath, EntryOutcome::DecodeSkipped, Vec::new());
            },
        };
        let source = Source {
            root: &self.root,
            relpath: &self.relpath,
            siblings: &self.siblings,
        };
        let started = Instant::now();
        let outcome = self.chain.run(&source, text);
        let elapsed = started.elapsed();

        match outcome {
            Ok(texts) => {
                let artifacts = texts
                    .into_iter()
                    .enumerate()
                    .map(|(index, text)| artifact(&self.relpath, index, &self.input_hash, text, None, elapsed))
                    .collect();
                Attempt::new(self.relpath, EntryOutcome::Produced, artifacts)
            },
            Err(failure) => {
                let outcome = match failure.kind {
                    FailureKind::BadInput => {
                        tracing::debug!(relpath = %self.relpath, reason = %failure.message, "Input rejected");
                        EntryOutcome::BadInput
                    },
                    FailureKind::Internal => {
                        tracing::warn!(relpath = %self.relpath, reason = %failure.message, "Preprocessing faulted");
                        EntryOutcome::Internal
                    },
                };
                let artifact = failed_artifact(&self.relpath, &self.input_hash, failure, elapsed);
                Attempt::new(self.relpath, outcome, vec![artifact])
            },
        }
    }
}

fn failed_artifact(relpath: &str, input_hash: &str, failure: Failure, elapsed: Duration) -> Artifact {
    let text = match failure.kind {
        FailureKind::BadInput => failure.message,
        FailureKind::Internal => format!("{INTERNAL_ERROR_PREFIX}{}", failure.message),
    };
    artifact(relpath, 0, input_hash, text, Some(failure.kind), elapsed)
}

fn artifact(
    relpath: &str,
    index: usize,
    input_hash: &str,
    text: String,
    failure: Option<FailureKind>,
    elapsed: Duration,
) -> Artifact {
    Artifact {
        relpath: relpath.to_string(),
        index: u32::try_from(index).unwrap_or(u32::MAX),
        hash: content_hash(&text, failure),
        input_hash: input_hash.to_string(),
        char_count: text.chars().count() as u64,
        line_count: text.split('\n').count() as u64,
        text,
        failure,
        duration: elapsed,
        created_at: UtcDateTime::now(),
    }
}
