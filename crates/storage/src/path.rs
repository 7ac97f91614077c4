//! Relative path validation.
//!
//! A relative path is the identity of a source item within its corpus, so it
//! has to be stable: no traversal outside the root, no empty paths, and one
//! canonical string form regardless of platform separator.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path and returns it normalized.
///
/// Parent references are resolved lexically; a path that would leave the
/// storage root, is empty after normalization, contains null bytes or a
/// platform prefix is rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use grist_storage::validate_path;
/// assert!(validate_path("src/main.c").is_ok());
/// assert!(validate_path("src/../main.c").is_ok());
/// assert!(validate_path("../main.c").is_err());
/// assert_eq!(validate_path("./src//lib/./a.c").unwrap(), Path::new("src/lib/a.c"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but
                // truncate in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
    }
    Ok(components.into_iter().collect())
}

/// Validates a path and renders it as a `/`-separated UTF-8 string, the form
/// in which relative paths are stored in the ledger.
pub fn to_relpath(path: impl AsRef<Path>) -> Result<String> {
    let validated = validate(path.as_ref())?;
    let mut parts = Vec::new();
    for component in validated.components() {
        let Some(part) = component.as_os_str().to_str() else {
            exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
        };
        parts.push(part);
    }
    Ok(parts.join("/"))
}
