use futures::{StreamExt, TryStreamExt};
use grist_config::{CorpusDefinition, Source};
use grist_ledger::{CorpusState, Database, EntryOutcome, Ledger, LedgerEntry};
use grist_pipeline::{Corpus, Event, ExportOptions, Pipeline, Report, Settings, export, exported};
use grist_preprocess::Registry;
use grist_storage::BackendHandle;
use grist_storage::backend::{LocalBackend, MockBackend};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const STEPS: [&str; 2] = ["reject_empty", "split_blank_line_blocks"];

fn definition(source: Source, steps: &[&str]) -> CorpusDefinition {
    CorpusDefinition {
        source,
        pattern: Some(r".*\.src".to_string()),
        steps: steps.iter().map(|s| s.to_string()).collect(),
    }
}

fn corpus(source: Source) -> Corpus {
    Corpus::new("kernels", definition(source, &STEPS))
}

fn mock_corpus() -> Corpus {
    corpus(Source::Directory(PathBuf::from("/mock")))
}

/// `a.src` yields one artifact, `b.src` two and `c.src` is rejected.
fn scenario() -> BackendHandle {
    Arc::new(MockBackend::with_files([
        ("a.src", "X"),
        ("b.src", "Y\n\nZ"),
        ("c.src", ""),
        ("notes.md", "ignored"),
    ]))
}

fn settings(workers: usize, interval: Duration) -> Settings {
    Settings {
        workers: NonZeroUsize::new(workers).unwrap(),
        checkpoint_interval: interval,
        commit_attempts: 3,
        commit_backoff: Duration::from_millis(1),
    }
}

async fn pipeline(settings: Settings) -> Pipeline {
    let db = Database::connect_in_memory().await.unwrap();
    Pipeline::new(Ledger::from(&db), Registry::with_builtins(), settings)
}

async fn complete(pipeline: &Pipeline, corpus: &Corpus, backend: &BackendHandle) -> Report {
    let events: Vec<Event> = pipeline.run_with_backend(corpus, Arc::clone(backend)).try_collect().await.unwrap();
    match events.last() {
        Some(Event::Complete(report)) => report.clone(),
        other => panic!("pass did not complete: {other:?}"),
    }
}

#[tokio::test]
async fn test_scenario() {
    let pipeline = pipeline(settings(4, Duration::from_secs(10))).await;
    let corpus = mock_corpus();
    let backend = scenario();

    let report = complete(&pipeline, &corpus, &backend).await;
    assert_eq!(report.enumerated, 3);
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.bad_input, 1);
    assert_eq!(report.artifacts_written, 4);
    assert!(report.done);

    let ledger = pipeline.ledger();
    let id = corpus.id();
    let entries = ledger.entries(&id).await.unwrap();
    let outcomes: Vec<_> = entries.iter().map(|e| (e.relpath.as_str(), e.outcome, e.artifact_count)).collect();
    assert_eq!(
        outcomes,
        vec![
            ("a.src", EntryOutcome::Produced, 1),
            ("b.src", EntryOutcome::Produced, 2),
            ("c.src", EntryOutcome::BadInput, 1),
        ]
    );
    let artifacts = ledger.artifacts(&id).await.unwrap();
    let texts: Vec<_> = artifacts.iter().filter(|a| a.is_success()).map(|a| a.text.as_str()).collect();
    assert_eq!(texts, vec!["X", "Y", "Z"]);
    assert_eq!(artifacts.iter().filter(|a| !a.is_success()).count(), 1);

    let summary = ledger.summary(&id).await.unwrap();
    assert_eq!(summary.entries(), 3);
    assert_eq!(summary.artifacts, 4);
    assert_eq!(summary.failed_artifacts, 1);
    assert_eq!(summary.state(), CorpusState::Done);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let corpus = mock_corpus();
    let backend = scenario();
    complete(&pipeline, &corpus, &backend).await;
    let before = pipeline.ledger().artifacts(&corpus.id()).await.unwrap();

    let report = complete(&pipeline, &corpus, &backend).await;
    assert!(report.already_done);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.processed, 0);
    assert_eq!(pipeline.ledger().artifacts(&corpus.id()).await.unwrap(), before);
}

#[tokio::test]
async fn test_interrupted_pass_resumes() {
    let files: Vec<(String, String)> = (0..8).map(|i| (format!("{i}.src"), format!("file {i}"))).collect();
    let backend: BackendHandle = Arc::new(MockBackend::with_files(files));
    let pipeline = pipeline(settings(1, Duration::ZERO)).await;
    let corpus = mock_corpus();
    let id = corpus.id();

    {
        let events = pipeline.run_with_backend(&corpus, Arc::clone(&backend));
        futures::pin_mut!(events);
        let mut checkpoints = 0;
        while let Some(event) = events.next().await {
            if let Event::Checkpoint(_) = event.unwrap() {
                checkpoints += 1;
                if checkpoints == 3 {
                    break;
                }
            }
        }
    }
    assert_eq!(pipeline.ledger().attempted(&id).await.unwrap().len(), 3);
    assert_eq!(pipeline.ledger().state(&id).await.unwrap(), CorpusState::InProgress);

    let events: Vec<Event> = pipeline.run_with_backend(&corpus, Arc::clone(&backend)).try_collect().await.unwrap();
    assert!(events.contains(&Event::DiscoveryComplete { enumerated: 8, pending: 5 }));
    let processed = events.iter().filter(|e| matches!(e, Event::Processed(_))).count();
    assert_eq!(processed, 5);
    assert!(pipeline.ledger().is_done(&id).await.unwrap());

    // Same ledger contents as a pass that was never interrupted.
    let fresh = self::pipeline(settings(3, Duration::from_secs(10))).await;
    complete(&fresh, &corpus, &backend).await;
    let outcomes = |entries: Vec<LedgerEntry>| -> HashSet<(String, EntryOutcome, u32)> {
        entries.into_iter().map(|e| (e.relpath, e.outcome, e.artifact_count)).collect()
    };
    let resumed = outcomes(pipeline.ledger().entries(&id).await.unwrap());
    assert_eq!(resumed.len(), 8);
    assert_eq!(resumed, outcomes(fresh.ledger().entries(&id).await.unwrap()));
    assert_eq!(
        pipeline.ledger().artifact_hashes(&id).await.unwrap(),
        fresh.ledger().artifact_hashes(&id).await.unwrap()
    );
}

#[tokio::test]
async fn test_identical_outputs_stored_once() {
    let backend: BackendHandle = Arc::new(MockBackend::with_files([
        ("a.src", "same"),
        ("b.src", "same"),
        ("c.src", "same\n\nother"),
    ]));
    let pipeline = pipeline(settings(1, Duration::from_secs(10))).await;
    let corpus = mock_corpus();

    let report = complete(&pipeline, &corpus, &backend).await;
    assert_eq!(report.artifacts_written, 2);
    assert_eq!(report.artifacts_deduplicated, 2);
    let hashes = pipeline.ledger().artifact_hashes(&corpus.id()).await.unwrap();
    assert_eq!(hashes.len(), 2);
    // Every input still has its own entry.
    assert_eq!(pipeline.ledger().entries(&corpus.id()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_rejection_matching_an_output_is_kept() {
    // `reject_empty` rejects `c.src` with the exact text `a.src` produces.
    let backend: BackendHandle = Arc::new(MockBackend::with_files([("a.src", "no content"), ("c.src", "")]));
    let pipeline = pipeline(settings(1, Duration::from_secs(10))).await;
    let corpus = mock_corpus();
    let id = corpus.id();

    let report = complete(&pipeline, &corpus, &backend).await;
    assert_eq!(report.artifacts_written, 2);
    assert_eq!(report.artifacts_deduplicated, 0);
    let summary = pipeline.ledger().summary(&id).await.unwrap();
    assert_eq!(summary.artifacts, 2);
    assert_eq!(summary.failed_artifacts, 1);
    let artifacts = pipeline.ledger().artifacts(&id).await.unwrap();
    let stored: Vec<_> = artifacts.iter().map(|a| (a.relpath.as_str(), a.text.as_str(), a.is_success())).collect();
    assert_eq!(stored, vec![("a.src", "no content", true), ("c.src", "no content", false)]);
}

#[tokio::test]
async fn test_undecodable_input_is_isolated() {
    let backend: BackendHandle = Arc::new(MockBackend::with_files([
        ("a.src", b"X".to_vec()),
        ("latin1.src", vec![0x63, 0x61, 0x66, 0xe9]),
    ]));
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let corpus = mock_corpus();

    let report = complete(&pipeline, &corpus, &backend).await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.decode_skipped, 1);
    assert!(report.done);
    let entries = pipeline.ledger().entries(&corpus.id()).await.unwrap();
    let skipped = entries.iter().find(|e| e.relpath == "latin1.src").unwrap();
    assert_eq!(skipped.outcome, EntryOutcome::DecodeSkipped);
    assert_eq!(skipped.artifact_count, 0);
}

#[tokio::test]
async fn test_done_corpus_ignores_new_inputs_until_reset() {
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let corpus = mock_corpus();
    let id = corpus.id();
    complete(&pipeline, &corpus, &scenario()).await;

    let grown: BackendHandle = Arc::new(MockBackend::with_files([
        ("a.src", "X"),
        ("b.src", "Y\n\nZ"),
        ("c.src", ""),
        ("d.src", "W"),
    ]));
    let report = complete(&pipeline, &corpus, &grown).await;
    assert!(report.already_done);
    assert!(!pipeline.ledger().contains(&id, "d.src").await.unwrap());

    assert_eq!(pipeline.ledger().reset(&id).await.unwrap(), 3);
    let report = complete(&pipeline, &corpus, &grown).await;
    assert!(!report.already_done);
    assert_eq!(report.dispatched, 4);
    assert!(report.done);
}

#[tokio::test]
async fn test_changed_definition_is_a_new_corpus() {
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let backend = scenario();
    let first = mock_corpus();
    complete(&pipeline, &first, &backend).await;

    let second = Corpus::new("kernels", definition(Source::Directory(PathBuf::from("/mock")), &["reject_empty"]));
    assert_ne!(first.id(), second.id());
    let report = complete(&pipeline, &second, &backend).await;
    assert_eq!(report.dispatched, 3);
    assert_eq!(pipeline.ledger().corpora().await.unwrap().len(), 2);
    // Outputs of the first definition are untouched.
    assert_eq!(pipeline.ledger().artifacts(&first.id()).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_directory_source() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("nested/.git")).unwrap();
    std::fs::write(dir.path().join("a.src"), "X").unwrap();
    std::fs::write(dir.path().join("nested/b.src"), "Y").unwrap();
    std::fs::write(dir.path().join("nested/.git/c.src"), "Z").unwrap();
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let corpus = corpus(Source::Directory(dir.path().to_path_buf()));

    let report = pipeline.run_to_completion(&corpus).await.unwrap();
    assert_eq!(report.enumerated, 2);
    let attempted = pipeline.ledger().attempted(&corpus.id()).await.unwrap();
    assert!(attempted.contains("nested/b.src"));
    assert!(!attempted.contains("nested/.git/c.src"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_directory_source_skips_symlinks() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret"), "do not read").unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.src"), "X").unwrap();
    std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("evil.src")).unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();
    std::fs::write(outside.path().join("more.src"), "Y").unwrap();
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let corpus = corpus(Source::Directory(dir.path().to_path_buf()));

    let report = pipeline.run_to_completion(&corpus).await.unwrap();
    assert_eq!(report.enumerated, 1);
    assert!(report.done);
    let attempted = pipeline.ledger().attempted(&corpus.id()).await.unwrap();
    assert_eq!(attempted, HashSet::from(["a.src".to_string()]));
    let texts: Vec<_> = pipeline.ledger().artifacts(&corpus.id()).await.unwrap().into_iter().map(|a| a.text).collect();
    assert_eq!(texts, vec!["X"]);
}

fn write_archive(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[tokio::test]
async fn test_archive_source() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("kernels.tar.gz");
    write_archive(&archive, &[("a.src", "X"), ("deep/b.src", "Y\n\nZ"), ("deep/c.src", "")]);
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let corpus = corpus(Source::Archive(archive));

    let report = pipeline.run_to_completion(&corpus).await.unwrap();
    assert_eq!(report.enumerated, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.bad_input, 1);
    assert!(report.done);
    assert!(pipeline.ledger().contains(&corpus.id(), "deep/b.src").await.unwrap());
}

#[tokio::test]
async fn test_export_after_pass() {
    let pipeline = pipeline(settings(2, Duration::from_secs(10))).await;
    let corpus = mock_corpus();
    let id = corpus.id();
    let backend = scenario();

    let out = tempfile::tempdir().unwrap();
    let target = LocalBackend::new("export", out.path().join("kernels")).unwrap();
    pipeline.ledger().register(&id, &corpus.name, &corpus.definition.canonical_json()).await.unwrap();
    assert!(export(pipeline.ledger(), &id, &target, ExportOptions::default()).await.is_err());

    complete(&pipeline, &corpus, &backend).await;
    assert_eq!(export(pipeline.ledger(), &id, &target, ExportOptions::default()).await.unwrap(), 3);
    let hashes = exported(&target).await.unwrap().unwrap();
    assert_eq!(hashes.len(), 3);
    let first = std::fs::read_to_string(out.path().join("kernels").join(format!("{}.txt", hashes[0]))).unwrap();
    assert!(["X", "Y", "Z"].contains(&first.as_str()));
}
