//! Preprocessing steps.
//!
//! A [`Preprocessor`] turns the text of one source file into zero or more
//! output texts, or rejects it with a [`Failure`]. Steps are looked up by
//! identifier in a [`Registry`] once, when a pipeline is built, and chained:
//! every output of one step is fed to the next.
//!
//! ```
//! use grist_preprocess::{Registry, Source};
//! use std::path::Path;
//!
//! let registry = Registry::with_builtins();
//! let chain = registry.resolve(["normalize_newlines", "reject_empty"]).unwrap();
//! let source = Source { root: Path::new("/srv/corpus"), relpath: "a.cl", siblings: &[] };
//! assert_eq!(chain.run(&source, "kernel\r\n".to_string()).unwrap(), vec!["kernel\n"]);
//! ```

pub mod error;
mod steps;

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

/// Why a file was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The input is not something the steps accept. Expected for a share of
    /// any real corpus.
    BadInput,
    /// The step itself is broken.
    Internal,
}
impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::BadInput => "bad_input",
            FailureKind::Internal => "internal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bad_input" => Some(FailureKind::BadInput),
            "internal" => Some(FailureKind::Internal),
            _ => None,
        }
    }
}
impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}
impl Failure {
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::BadInput,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Internal,
            message: message.into(),
        }
    }
}

pub type Outcome = std::result::Result<Vec<String>, Failure>;

/// The file being processed and its surroundings.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    /// Root the corpus was read from.
    pub root: &'a Path,
    /// `/`-separated path of this file relative to `root`.
    pub relpath: &'a str,
    /// Relative paths of every file under `root`, sorted.
    pub siblings: &'a [String],
}

pub trait Preprocessor: Send + Sync {
    /// Identifier used in corpus definitions.
    fn name(&self) -> &'static str;

    fn process(&self, source: &Source<'_>, text: String) -> Outcome;
}

/// Maps step identifiers to implementations.
#[derive(Clone, Default)]
pub struct Registry {
    steps: BTreeMap<&'static str, Arc<dyn Preprocessor>>,
}

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every built-in step.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for step in steps::builtins() {
            // Built-in names are unique.
            let _ = registry.register(step);
        }
        registry
    }

    pub fn register(&mut self, step: Arc<dyn Preprocessor>) -> Result<()> {
        let name = step.name();
        if self.steps.contains_key(name) {
            exn::bail!(ErrorKind::DuplicateStep(name.to_string()));
        }
        self.steps.insert(name, step);
        Ok(())
    }

    /// Registered identifiers in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.keys().copied()
    }

    /// Resolve step identifiers into a runnable chain, failing on the first
    /// identifier that is not registered.
    pub fn resolve<I, S>(&self, ids: I) -> Result<Chain>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let steps = ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref();
                self.steps.get(id).cloned().ok_or_raise(|| ErrorKind::UnknownStep(id.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        if steps.is_empty() {
            exn::bail!(ErrorKind::EmptyChain);
        }
        let chain = Chain { steps };
        tracing::debug!(steps = ?chain.names(), "Resolved preprocessing chain");
        Ok(chain)
    }
}

/// An ordered, resolved list of steps.
#[derive(Clone)]
pub struct Chain {
    steps: Vec<Arc<dyn Preprocessor>>,
}

impl Chain {
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order. The first failure stops the chain. A step
    /// that panics is reported as an [`Internal`](FailureKind::Internal)
    /// failure.
    pub fn run(&self, source: &Source<'_>, text: String) -> Outcome {
        let mut texts = vec![text];
        for step in &self.steps {
            let mut next = Vec::with_capacity(texts.len());
            for text in texts {
                let result = catch_unwind(AssertUnwindSafe(|| step.process(source, text)))
                    .unwrap_or_else(|payload| Err(Failure::internal(format!("{} panicked: {}", step.name(), panic_message(&*payload)))));
                next.extend(result?);
            }
            texts = next;
        }
        Ok(texts)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
