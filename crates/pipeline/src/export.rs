//! Writing a finished corpus out as plain text files.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use grist_ledger::Ledger;
use grist_storage::StorageBackend;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Written after every artifact; its presence means the export is complete.
pub const DONE_MARKER: &str = "DONE";
const EXTENSION: &str = "txt";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Also write the failure messages of rejected or faulted inputs.
    pub include_failed: bool,
}

/// Export every artifact of a done corpus to `target` as `<hash>.txt`.
///
/// Returns the number of files written, not counting the marker. Rerunning an
/// export rewrites the same files with the same contents.
#[instrument(skip(ledger, target), fields(backend = %target.name()))]
pub async fn export(ledger: &Ledger, id: &str, target: &dyn StorageBackend, options: ExportOptions) -> Result<u64> {
    if !ledger.is_done(id).await.or_raise(|| ErrorKind::Ledger)? {
        exn::bail!(ErrorKind::NotDone(id.to_string()));
    }
    let artifacts = ledger.artifacts(id).await.or_raise(|| ErrorKind::Ledger)?;
    let mut written = 0;
    for artifact in artifacts.iter().filter(|a| options.include_failed || a.is_success()) {
        let path = PathBuf::from(format!("{}.{EXTENSION}", artifact.hash));
        target
            .write(&path, artifact.text.as_bytes())
            .await
            .or_raise(|| ErrorKind::Export)?;
        written += 1;
    }
    target
        .write(Path::new(DONE_MARKER), b"")
        .await
        .or_raise(|| ErrorKind::Export)?;
    tracing::info!(id, written, skipped = artifacts.len() as u64 - written, "Export complete");
    Ok(written)
}

/// Hashes of the artifacts in a completed export, sorted.
///
/// Returns `None` if the export never finished.
pub async fn exported(target: &dyn StorageBackend) -> Result<Option<Vec<String>>> {
    if !target.exists(Path::new(DONE_MARKER)).await.or_raise(|| ErrorKind::Export)? {
        return Ok(None);
    }
    let files: Vec<_> = target.list().await.or_raise(|| ErrorKind::Export)?;
    let mut hashes: Vec<String> = files
        .iter()
        .filter(|f| f.path.parent().is_none_or(|p| p.as_os_str().is_empty()))
        .filter(|f| f.path.extension().is_some_and(|e| e == EXTENSION))
        .filter_map(|f| f.path.file_stem()?.to_str().map(String::from))
        .collect();
    hashes.sort();
    Ok(Some(hashes))
}
