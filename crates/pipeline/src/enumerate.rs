//! Listing candidate inputs under a corpus root.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use grist_storage::{BackendHandle, to_relpath};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::instrument;

/// Version control metadata never enters a corpus.
const EXCLUDED_DIRECTORY: &str = ".git";

/// Inclusion pattern, matched against the whole `/`-separated relative path.
#[derive(Debug, Clone)]
pub struct Pattern(Option<Regex>);

impl Pattern {
    /// Every file.
    pub fn all() -> Self {
        Self(None)
    }

    /// Compile an inclusion pattern. A leading `^` is accepted and means the
    /// same as no anchor: the pattern must always match from the start of
    /// the relative path to its end.
    pub fn new(pattern: Option<&str>) -> Result<Self> {
        let Some(pattern) = pattern else {
            return Ok(Self::all());
        };
        let anchored = format!("^(?:{})$", pattern.strip_prefix('^').unwrap_or(pattern));
        let regex = Regex::new(&anchored).or_raise(|| ErrorKind::Configuration)?;
        Ok(Self(Some(regex)))
    }

    pub fn matches(&self, relpath: &str) -> bool {
        self.0.as_ref().is_none_or(|regex| regex.is_match(relpath))
    }
}

/// Result of listing a corpus root.
#[derive(Debug, Clone)]
pub struct Enumeration {
    /// Relative paths matching the inclusion pattern, in enumeration order.
    pub included: Vec<String>,
    /// Relative paths of every file under the root, matched or not.
    pub siblings: Arc<[String]>,
}

/// Case-insensitive order, falling back to a byte-wise comparison so that
/// paths differing only in case still sort deterministically.
fn enumeration_order(a: &String, b: &String) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

fn is_excluded(relpath: &str) -> bool {
    relpath.split('/').any(|component| component == EXCLUDED_DIRECTORY)
}

/// List every file under the backend root and select the ones matching
/// `pattern`.
///
/// The listing must be complete: any part of the tree that cannot be read
/// fails the whole enumeration rather than silently shrinking the corpus.
#[instrument(skip_all, fields(backend = backend.name()))]
pub async fn enumerate(backend: &BackendHandle, pattern: &Pattern) -> Result<Enumeration> {
    let files = backend.list().await.or_raise(|| ErrorKind::Enumeration)?;
    let mut siblings = Vec::with_capacity(files.len());
    for file in files {
        let relpath = to_relpath(&file.path).or_raise(|| ErrorKind::Enumeration)?;
        if !is_excluded(&relpath) {
            siblings.push(relpath);
        }
    }
    siblings.sort_by(enumeration_order);
    let included: Vec<String> = siblings.iter().filter(|relpath| pattern.matches(relpath)).cloned().collect();
    if included.is_empty() {
        tracing::warn!(root = %backend.root().display(), files = siblings.len(), "No files matched the inclusion pattern");
    } else {
        tracing::debug!(included = included.len(), files = siblings.len(), "Enumerated corpus source");
    }
    Ok(Enumeration {
        included,
        siblings: siblings.into(),
    })
}
