use crate::checkpoint::Checkpointer;
use crate::dispatch::{dispatch, plan};
use crate::enumerate::{Pattern, enumerate};
use crate::error::{ErrorKind, Result};
use crate::report::Report;
use async_stream::try_stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use grist_archive::Unpacked;
use grist_config::{Config, CorpusDefinition, Source};
use grist_ledger::{CommitSummary, EntryOutcome, Ledger};
use grist_preprocess::Registry;
use grist_storage::BackendHandle;
use grist_storage::backend::LocalBackend;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tuning for a pipeline pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub workers: NonZeroUsize,
    pub checkpoint_interval: Duration,
    pub commit_attempts: u32,
    pub commit_backoff: Duration,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            checkpoint_interval: Duration::from_secs(10),
            commit_attempts: 3,
            commit_backoff: Duration::from_millis(100),
        }
    }
}
impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.workers(),
            checkpoint_interval: config.checkpoint_interval(),
            commit_attempts: config.commit_attempts,
            commit_backoff: config.commit_backoff(),
        }
    }
}

/// A named corpus definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    pub name: String,
    pub definition: CorpusDefinition,
}
impl Corpus {
    pub fn new(name: impl Into<String>, definition: CorpusDefinition) -> Self {
        Self {
            name: name.into(),
            definition,
        }
    }

    pub fn id(&self) -> String {
        self.definition.identity()
    }
}

/// One input finished processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub relpath: String,
    pub outcome: EntryOutcome,
    pub artifacts: u32,
}

/// Progress of a pass.
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete), once, unless the
///    corpus was already done.
/// 3. [`Processed`](Self::Processed) once per dispatched input, interleaved
///    with [`Checkpoint`](Self::Checkpoint) after every commit.
/// 4. [`Complete`](Self::Complete), exactly once.
///
/// An error terminates the stream early, in which case `Complete` is never
/// emitted. Dropping the stream interrupts the pass; committed checkpoints
/// remain valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started { corpus: String, id: String },
    DiscoveryComplete { enumerated: u64, pending: u64 },
    Processed(Processed),
    Checkpoint(CommitSummary),
    Complete(Report),
}

enum Origin {
    /// Materialize the source named by the corpus definition.
    Definition,
    /// Read from an already constructed backend.
    Backend(BackendHandle),
}

/// Drives corpora through enumeration, preprocessing and checkpointing.
pub struct Pipeline {
    ledger: Ledger,
    registry: Registry,
    settings: Settings,
}

impl Pipeline {
    pub fn new(ledger: Ledger, registry: Registry, settings: Settings) -> Self {
        Self {
            ledger,
            registry,
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one pass over `corpus`, reading the source its definition names.
    pub fn run<'a>(&'a self, corpus: &'a Corpus) -> impl Stream<Item = Result<Event>> + 'a {
        self.drive(corpus, Origin::Definition)
    }

    /// Run one pass over `corpus`, reading files from `backend` instead of
    /// the definition's source. The definition still decides the identity,
    /// the inclusion pattern and the steps.
    pub fn run_with_backend<'a>(
        &'a self,
        corpus: &'a Corpus,
        backend: BackendHandle,
    ) -> impl Stream<Item = Result<Event>> + 'a {
        self.drive(corpus, Origin::Backend(backend))
    }

    /// Run a pass to the end and return its report.
    pub async fn run_to_completion(&self, corpus: &Corpus) -> Result<Report> {
        let events = self.run(corpus);
        futures::pin_mut!(events);
        while let Some(event) = events.try_next().await? {
            if let Event::Complete(report) = event {
                return Ok(report);
            }
        }
        // `Complete` is always the last event of a stream that did not fail.
        exn::bail!(ErrorKind::Ledger)
    }

    fn drive<'a>(&'a self, corpus: &'a Corpus, origin: Origin) -> impl Stream<Item = Result<Event>> + 'a {
        try_stream! {
            let started = Instant::now();
            let definition = &corpus.definition;
            let id = corpus.id();
            let chain = self.registry.resolve(&definition.steps).or_raise(|| ErrorKind::Configuration)?;
            let pattern = Pattern::new(definition.pattern.as_deref())?;
            self.ledger
                .register(&id, &corpus.name, &definition.canonical_json())
                .await
                .or_raise(|| ErrorKind::Ledger)?;
            yield Event::Started { corpus: corpus.name.clone(), id: id.clone() };

            let mut report = Report::new(&corpus.name, &id);
            if self.ledger.is_done(&id).await.or_raise(|| ErrorKind::Ledger)? {
                tracing::info!(corpus = %corpus.name, %id, "Corpus already done, skipping");
                report.already_done = true;
                report.done = true;
                report.elapsed = started.elapsed();
                yield Event::Complete(report);
                return;
            }

            // The unpacked archive (if any) lives until the stream is
            // finished or dropped.
            let (backend, _unpacked) = match origin {
                Origin::Definition => materialize(&corpus.name, &definition.source).await?,
                Origin::Backend(backend) => (backend, None),
            };
            let enumeration = enumerate(&backend, &pattern).await?;
            let attempted = self.ledger.attempted(&id).await.or_raise(|| ErrorKind::Ledger)?;
            let jobs = plan(&enumeration.included, &attempted);
            report.enumerated = enumeration.included.len() as u64;
            report.dispatched = jobs.len() as u64;
            tracing::info!(
                corpus = %corpus.name,
                enumerated = report.enumerated,
                pending = report.dispatched,
                workers = self.settings.workers.get(),
                "Discovery complete"
            );
            yield Event::DiscoveryComplete { enumerated: report.enumerated, pending: report.dispatched };

            let mut checkpointer = Checkpointer::new(&self.ledger, &id, self.settings.checkpoint_interval)
                .with_retries(self.settings.commit_attempts, self.settings.commit_backoff);
            let mut finished = attempted;
            if !jobs.is_empty() {
                let results = dispatch(&backend, &chain, Arc::clone(&enumeration.siblings), jobs, self.settings.workers);
                for await attempt in results {
                    report.record(&attempt);
                    finished.insert(attempt.entry.relpath.clone());
                    let processed = Processed {
                        relpath: attempt.entry.relpath.clone(),
                        outcome: attempt.entry.outcome,
                        artifacts: attempt.entry.artifact_count,
                    };
                    checkpointer.push(attempt);
                    yield Event::Processed(processed);
                    if let Some(summary) = checkpointer.maybe_flush().await? {
                        report.checkpoint(&summary);
                        yield Event::Checkpoint(summary);
                    }
                }
            }

            // The marker commits in the same transaction as the last
            // pending attempts.
            let remaining = plan(&enumeration.included, &finished);
            if remaining.is_empty() {
                checkpointer.mark_done();
            } else {
                tracing::warn!(corpus = %corpus.name, remaining = remaining.len(), "Inputs left without a ledger entry");
            }
            if let Some(summary) = checkpointer.flush().await? {
                report.checkpoint(&summary);
                yield Event::Checkpoint(summary);
            }
            report.done = remaining.is_empty();
            report.elapsed = started.elapsed();
            tracing::info!(
                corpus = %corpus.name,
                processed = report.processed,
                succeeded = report.succeeded,
                bad_input = report.bad_input,
                internal = report.internal,
                decode_skipped = report.decode_skipped,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Pass complete"
            );
            yield Event::Complete(report);
        }
    }
}

/// Make a corpus source readable through a storage backend. Archives are
/// unpacked into a temporary directory, removed when the guard is dropped.
async fn materialize(name: &str, source: &Source) -> Result<(BackendHandle, Option<Unpacked>)> {
    match source {
        Source::Directory(path) => {
            let backend = LocalBackend::open(name, path).or_raise(|| ErrorKind::Setup)?;
            Ok((Arc::new(backend), None))
        },
        Source::Archive(path) => {
            let archive = path.clone();
            let unpacked = tokio::task::spawn_blocking(move || grist_archive::unpack_to_temp(archive))
                .await
                .or_raise(|| ErrorKind::Setup)?
                .or_raise(|| ErrorKind::Setup)?;
            tracing::debug!(archive = %path.display(), root = %unpacked.path().display(), files = unpacked.files(), "Unpacked corpus archive");
            let backend = LocalBackend::open(name, unpacked.path()).or_raise(|| ErrorKind::Setup)?;
            Ok((Arc::new(backend), Some(unpacked)))
        },
    }
}
