mod error;

use crate::error::{ErrorKind, Result};
use clap::{ArgAction, Parser, Subcommand};
use exn::ResultExt;
use futures::TryStreamExt;
use grist_config::Config;
use grist_ledger::{Database, Ledger};
use grist_pipeline::{Corpus, Event, ExportOptions, Pipeline, Report, Settings};
use grist_preprocess::Registry;
use grist_storage::backend::LocalBackend;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status of a pass cut short by Ctrl-C.
const INTERRUPTED: u8 = 130;

/// Incremental, content-addressed preprocessing of source corpora.
#[derive(Debug, Parser)]
#[command(name = "grist", version, about)]
struct Cli {
    /// Configuration file, layered over the platform configuration directory.
    #[arg(short, long, global = true, env = "GRIST_CONFIG")]
    config: Option<PathBuf>,
    /// Increase log verbosity. Ignored when `RUST_LOG` is set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process corpora, resuming from the last checkpoint.
    Run {
        /// Corpora to process. Defaults to every configured corpus.
        corpora: Vec<String>,
    },
    /// Show the progress of corpora.
    Status {
        /// Corpora to show. Defaults to every configured corpus.
        corpora: Vec<String>,
    },
    /// Forget every ledger entry and artifact of a corpus.
    Reset { corpus: String },
    /// Write the artifacts of a finished corpus to a directory.
    Export {
        corpus: String,
        directory: PathBuf,
        /// Also write the failure messages of rejected inputs.
        #[arg(long)]
        include_failed: bool,
    },
    /// List the available preprocessing steps.
    Steps,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:?}");
            ExitCode::FAILURE
        },
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let registry = Registry::with_builtins();
    if let Command::Steps = cli.command {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    config.validate().or_raise(|| ErrorKind::Config)?;
    if let Some(parent) = config.database.parent() {
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
    }
    let db = Database::connect(&config.database).await.or_raise(|| ErrorKind::Database)?;
    let ledger = Ledger::from(&db);

    let code = match cli.command {
        Command::Run { corpora } => {
            let pipeline = Pipeline::new(ledger, registry, Settings::from(&config));
            run(&pipeline, select(&config, &corpora)?).await?
        },
        Command::Status { corpora } => {
            status(&ledger, select(&config, &corpora)?).await?;
            ExitCode::SUCCESS
        },
        Command::Reset { corpus } => {
            let corpus = find(&config, &corpus)?;
            let id = corpus.id();
            if ledger.corpus(&id).await.or_raise(|| ErrorKind::Ledger)?.is_none() {
                exn::bail!(ErrorKind::NeverRun(corpus.name));
            }
            let removed = ledger.reset(&id).await.or_raise(|| ErrorKind::Ledger)?;
            println!("{}: removed {removed} ledger entries", corpus.name);
            ExitCode::SUCCESS
        },
        Command::Export {
            corpus,
            directory,
            include_failed,
        } => {
            let corpus = find(&config, &corpus)?;
            let directory = std::path::absolute(&directory).or_raise(|| ErrorKind::Export(corpus.name.clone()))?;
            let target = LocalBackend::new(&corpus.name, &directory).or_raise(|| ErrorKind::Export(corpus.name.clone()))?;
            let options = ExportOptions { include_failed };
            let written = grist_pipeline::export(&ledger, &corpus.id(), &target, options)
                .await
                .or_raise(|| ErrorKind::Export(corpus.name.clone()))?;
            println!("{}: wrote {written} artifacts to {}", corpus.name, directory.display());
            ExitCode::SUCCESS
        },
        Command::Steps => ExitCode::SUCCESS,
    };
    db.close().await;
    Ok(code)
}

fn find(config: &Config, name: &str) -> Result<Corpus> {
    let definition = config.corpus(name).or_raise(|| ErrorKind::Config)?;
    Ok(Corpus::new(name, definition.clone()))
}

/// The named corpora, or every configured corpus if none are named.
fn select(config: &Config, names: &[String]) -> Result<Vec<Corpus>> {
    if names.is_empty() {
        return Ok(config
            .corpora
            .iter()
            .map(|(name, definition)| Corpus::new(name, definition.clone()))
            .collect());
    }
    names.iter().map(|name| find(config, name)).collect()
}

async fn run(pipeline: &Pipeline, corpora: Vec<Corpus>) -> Result<ExitCode> {
    if corpora.is_empty() {
        tracing::warn!("No corpora configured");
    }
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    for corpus in &corpora {
        let events = pipeline.run(corpus);
        futures::pin_mut!(events);
        loop {
            let event = tokio::select! {
                event = events.try_next() => event.or_raise(|| ErrorKind::Pipeline(corpus.name.clone()))?,
                _ = &mut interrupt => {
                    tracing::warn!(corpus = %corpus.name, "Interrupted, work since the last checkpoint will be redone");
                    return Ok(ExitCode::from(INTERRUPTED));
                },
            };
            match event {
                None => break,
                Some(Event::Started { corpus, id }) => tracing::info!(%corpus, %id, "Starting pass"),
                Some(Event::DiscoveryComplete { .. }) => {},
                Some(Event::Processed(processed)) => {
                    tracing::debug!(relpath = %processed.relpath, outcome = %processed.outcome, artifacts = processed.artifacts, "Processed");
                },
                Some(Event::Checkpoint(_)) => {},
                Some(Event::Complete(report)) => println!("{}", summary(&report)),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn summary(report: &Report) -> String {
    if report.already_done {
        return format!("{}: already done", report.corpus);
    }
    format!(
        "{}: {} processed ({} succeeded, {} rejected, {} internal errors, {} undecodable), {} artifacts written, {} deduplicated, {} in {:.1}s",
        report.corpus,
        report.processed,
        report.succeeded,
        report.bad_input,
        report.internal,
        report.decode_skipped,
        report.artifacts_written,
        report.artifacts_deduplicated,
        if report.done { "done" } else { "not done" },
        report.elapsed.as_secs_f64(),
    )
}

async fn status(ledger: &Ledger, corpora: Vec<Corpus>) -> Result<()> {
    for corpus in corpora {
        let id = corpus.id();
        let state = ledger.state(&id).await.or_raise(|| ErrorKind::Ledger)?;
        let summary = ledger.summary(&id).await.or_raise(|| ErrorKind::Ledger)?;
        println!(
            "{}\t{}\t{} entries ({} produced, {} rejected, {} internal errors, {} undecodable)\t{} artifacts ({} failed)",
            corpus.name,
            state.as_str(),
            summary.entries(),
            summary.produced,
            summary.bad_input,
            summary.internal,
            summary.decode_skipped,
            summary.artifacts,
            summary.failed_artifacts,
        );
    }
    Ok(())
}
