//! Layered configuration for grist.
//!
//! Sources are merged in increasing order of precedence:
//!
//! 1. built-in defaults,
//! 2. `grist.toml`, `grist.yaml` or `grist.json` in the platform config
//!    directory,
//! 3. a file given explicitly (`--config`),
//! 4. `GRIST_`-prefixed environment variables, with `__` separating nested
//!    keys (`GRIST_CORPORA__KERNELS__PATTERN`).

mod corpus;
pub mod error;

pub use crate::corpus::{CorpusDefinition, Source};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APPLICATION: &str = "grist";
const ENV_PREFIX: &str = "GRIST_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding ledgers and artifacts of every corpus.
    pub database: PathBuf,
    /// Parallel workers. Defaults to the available CPU parallelism.
    pub workers: Option<NonZeroUsize>,
    pub checkpoint_interval_secs: u64,
    /// Attempts per checkpoint commit before the run is aborted.
    pub commit_attempts: u32,
    /// Delay before the first commit retry; doubled on each further retry.
    pub commit_backoff_ms: u64,
    pub corpora: BTreeMap<String, CorpusDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        let database = project_dirs()
            .map(|dirs| dirs.data_dir().join("grist.sqlite"))
            .unwrap_or_else(|| PathBuf::from("grist.sqlite"));
        Self {
            database,
            workers: None,
            checkpoint_interval_secs: 10,
            commit_attempts: 3,
            commit_backoff_ms: 100,
            corpora: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load and validate configuration from every layer.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dirs) = project_dirs() {
            let dir = dirs.config_dir();
            tracing::debug!(dir = %dir.display(), "Looking for configuration files");
            figment = figment
                .merge(Toml::file(dir.join("grist.toml")))
                .merge(Yaml::file(dir.join("grist.yaml")))
                .merge(Json::file(dir.join("grist.json")));
        }
        if let Some(path) = explicit {
            figment = merge_file(figment, path)?;
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        for (name, definition) in &mut config.corpora {
            definition.expand(name)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.commit_attempts == 0 {
            exn::bail!(ErrorKind::Invalid);
        }
        for (name, definition) in &self.corpora {
            definition.validate(name)?;
        }
        Ok(())
    }

    pub fn corpus(&self, name: &str) -> Result<&CorpusDefinition> {
        self.corpora.get(name).ok_or_raise(|| ErrorKind::UnknownCorpus(name.to_string()))
    }

    /// Resolve the worker count, falling back to the available parallelism.
    pub fn workers(&self) -> NonZeroUsize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok())
            .unwrap_or(NonZeroUsize::MIN)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn commit_backoff(&self) -> Duration {
        Duration::from_millis(self.commit_backoff_ms)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION)
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
    }
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).unwrap_or_default();
    Ok(match extension.as_str() {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(extension)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const TOML: &str = r#"
        database = "/var/lib/grist/ledger.sqlite"
        workers = 4
        checkpoint_interval_secs = 30

        [corpora.kernels]
        source = { archive = "/srv/kernels.tar.bz2" }
        pattern = '^.*\.cl'
        steps = ["normalize_newlines", "reject_empty"]
    "#;

    #[test]
    fn test_defaults() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default()))).unwrap();
        assert_eq!(config.checkpoint_interval(), Duration::from_secs(10));
        assert_eq!(config.commit_attempts, 3);
        assert_eq!(config.commit_backoff(), Duration::from_millis(100));
        assert!(config.corpora.is_empty());
        assert!(config.workers().get() >= 1);
    }

    #[test]
    fn test_layered_toml() {
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(TOML));
        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config.database, PathBuf::from("/var/lib/grist/ledger.sqlite"));
        assert_eq!(config.workers(), NonZeroUsize::new(4).unwrap());
        assert_eq!(config.checkpoint_interval_secs, 30);
        // Untouched keys keep their defaults.
        assert_eq!(config.commit_attempts, 3);
        let kernels = config.corpus("kernels").unwrap();
        assert_eq!(kernels.source, Source::Archive(PathBuf::from("/srv/kernels.tar.bz2")));
        assert_eq!(kernels.steps.len(), 2);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grist.yaml");
        std::fs::write(&path, "workers: 2\ncorpora:\n  repos:\n    source:\n      directory: /srv/repos\n    steps: [reject_empty]\n")
            .unwrap();
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(TOML));
        let config = Config::from_figment(merge_file(figment, &path).unwrap()).unwrap();
        assert_eq!(config.workers(), NonZeroUsize::new(2).unwrap());
        assert_eq!(config.corpora.len(), 2);
        assert_eq!(config.corpus("repos").unwrap().pattern, None);
    }

    #[rstest]
    #[case("grist.ini")]
    #[case("grist")]
    fn test_unsupported_format(#[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, "").unwrap();
        let err = merge_file(Figment::new(), &path).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/grist.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_invalid_corpus_rejected() {
        let toml = r#"
            [corpora.broken]
            source = { directory = "relative" }
            steps = ["reject_empty"]
        "#;
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(toml));
        let err = Config::from_figment(figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidCorpus { .. }));
    }

    #[test]
    fn test_source_path_expanded() {
        let toml = r#"
            [corpora.home]
            source = { directory = "~/corpora/home" }
            steps = ["reject_empty"]
        "#;
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(toml));
        let config = Config::from_figment(figment).unwrap();
        let path = config.corpus("home").unwrap().source.path();
        assert!(path.is_absolute(), "{}", path.display());
        assert!(path.ends_with("corpora/home"));
    }

    #[test]
    fn test_unknown_corpus() {
        let err = Config::default().corpus("missing").unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownCorpus("missing".to_string()));
    }
}
