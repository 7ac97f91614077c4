use crate::error::{ErrorKind, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the raw files of a corpus come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// A directory tree, read in place.
    Directory(PathBuf),
    /// A tar archive (optionally gzip or bzip2 compressed), unpacked to a
    /// temporary directory for the duration of a pass.
    Archive(PathBuf),
}
impl Source {
    pub fn path(&self) -> &Path {
        match self {
            Source::Directory(path) | Source::Archive(path) => path,
        }
    }

    fn path_mut(&mut self) -> &mut PathBuf {
        match self {
            Source::Directory(path) | Source::Archive(path) => path,
        }
    }
}

/// Expand a leading `~` and every `$VAR` or `${VAR}` in a path.
///
/// Fails with a reason if the home directory is needed but unknown, or a
/// variable is not set.
fn expand_path(path: &Path, home: Option<&Path>, var: impl Fn(&str) -> Option<String>) -> std::result::Result<PathBuf, String> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    let mut expanded = String::with_capacity(text.len());
    let rest = match text.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = home.ok_or("cannot expand `~`: home directory unknown")?;
            expanded.push_str(home.to_str().ok_or("home directory is not valid UTF-8")?);
            rest
        },
        _ => text,
    };
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            expanded.push(c);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
            name.push(c);
        }
        if braced && chars.next_if_eq(&'}').is_none() {
            return Err(format!("unterminated `${{{name}` in path"));
        }
        if name.is_empty() {
            return Err("`$` is not followed by a variable name".to_string());
        }
        let value = var(&name).ok_or_else(|| format!("environment variable `{name}` is not set"))?;
        expanded.push_str(&value);
    }
    Ok(PathBuf::from(expanded))
}

/// Everything that determines the output of a corpus.
///
/// Two definitions that serialize to the same canonical JSON share one
/// identity, and therefore one ledger namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorpusDefinition {
    pub source: Source,
    /// Regular expression matched against the whole `/`-separated relative
    /// path of each file. Absent means every file.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Preprocessing step identifiers, applied in order.
    pub steps: Vec<String>,
}

impl CorpusDefinition {
    /// Stable JSON encoding of the definition. Field order is fixed by the
    /// struct declaration, so equal definitions always encode identically.
    pub fn canonical_json(&self) -> String {
        // Serializing plain strings and paths into a String cannot fail
        // unless a path is not UTF-8, which `validate()` rejects.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Lowercase hex BLAKE3 digest of [`canonical_json()`](Self::canonical_json).
    pub fn identity(&self) -> String {
        blake3::hash(self.canonical_json().as_bytes()).to_hex().to_string()
    }

    /// Expand `~` and environment variables in the source path, in place.
    /// Runs before [`validate()`](Self::validate) and before the identity is
    /// derived, so the identity always covers the concrete path.
    pub fn expand(&mut self, name: &str) -> Result<()> {
        let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        let path = self.source.path_mut();
        match expand_path(path, home.as_deref(), |key| std::env::var(key).ok()) {
            Ok(expanded) => *path = expanded,
            Err(reason) => exn::bail!(ErrorKind::invalid_corpus(name, reason)),
        }
        Ok(())
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        let path = self.source.path();
        if !path.is_absolute() {
            exn::bail!(ErrorKind::invalid_corpus(name, format!("source path must be absolute: {}", path.display())));
        }
        if path.to_str().is_none() {
            exn::bail!(ErrorKind::invalid_corpus(name, "source path must be valid UTF-8"));
        }
        if self.steps.is_empty() {
            exn::bail!(ErrorKind::invalid_corpus(name, "at least one preprocessing step is required"));
        }
        if let Some(pattern) = &self.pattern
            && let Err(e) = regex::Regex::new(pattern)
        {
            exn::bail!(ErrorKind::invalid_corpus(name, format!("invalid pattern: {e}")));
        }
        Ok(())
    }
}
