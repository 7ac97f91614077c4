//! Storage backends.
//!
//! Corpus sources are read through a [`StorageBackend`]: the pipeline lists
//! candidate files with [`StorageBackend::list_stream`] and reads each one
//! exactly once per job. Exported artifacts are written through the same
//! trait, so a corpus can be materialised anywhere a backend exists for.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::{to_relpath, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
