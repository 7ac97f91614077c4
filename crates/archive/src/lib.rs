//! Tar archives as corpus sources.
//!
//! An archive-backed corpus is unpacked into a temporary directory for the
//! duration of one pipeline pass. The [`Unpacked`] guard owns that directory
//! and removes it when dropped, whether the pass completed or not.
//!
//! Supported layouts are plain `.tar`, gzip (`.tar.gz`, `.tgz`) and bzip2
//! (`.tar.bz2`, `.tbz2`). The compression named by the extension is checked
//! against the file's magic bytes before anything is unpacked.

mod compression;
pub mod error;

pub use crate::compression::Compression;
use crate::compression::MAGIC_LEN;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::instrument;

/// A temporary directory holding the contents of an unpacked archive.
#[derive(Debug)]
pub struct Unpacked {
    dir: TempDir,
    files: u64,
}
impl Unpacked {
    /// Root of the unpacked tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Number of regular files that were unpacked.
    pub fn files(&self) -> u64 {
        self.files
    }
}

/// Unpack `archive` into a fresh temporary directory.
///
/// This is blocking I/O; async callers should run it on the blocking pool.
#[instrument(skip_all, fields(archive = %archive.as_ref().display()))]
pub fn unpack_to_temp(archive: impl AsRef<Path>) -> Result<Unpacked> {
    let dir = tempfile::Builder::new().prefix("grist_corpus_").tempdir().or_raise(|| ErrorKind::Unpack)?;
    let files = unpack(archive.as_ref(), dir.path())?;
    Ok(Unpacked { dir, files })
}

/// Unpack `archive` into `destination`, returning the number of regular
/// files written.
///
/// Entries that would land outside `destination` (absolute paths, `..`) are
/// skipped by the tar reader rather than written.
pub fn unpack(archive: &Path, destination: &Path) -> Result<u64> {
    let started = Instant::now();
    let compression = Compression::from_path(archive)?;
    let mut file = File::open(archive).or_raise(|| ErrorKind::Unreadable(archive.to_path_buf()))?;

    let mut head = Vec::with_capacity(MAGIC_LEN);
    (&mut file).take(MAGIC_LEN as u64).read_to_end(&mut head).or_raise(|| ErrorKind::Unreadable(archive.to_path_buf()))?;
    if !compression.check_magic_bytes(&head) {
        tracing::warn!(
            archive = %archive.display(),
            expected = %compression,
            found = %Compression::from_magic_bytes(&head),
            "Archive content does not match its extension"
        );
        exn::bail!(ErrorKind::InvalidData);
    }
    file.seek(SeekFrom::Start(0)).or_raise(|| ErrorKind::Unreadable(archive.to_path_buf()))?;

    let mut tarball = tar::Archive::new(compression.wrap_reader(file));
    let mut files = 0u64;
    for entry in tarball.entries().or_raise(|| ErrorKind::InvalidData)? {
        let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry.unpack_in(destination).or_raise(|| ErrorKind::Unpack)?;
        if !unpacked {
            let path: Option<PathBuf> = entry.path().ok().map(|p| p.into_owned());
            tracing::warn!(entry = ?path, "Skipped archive entry outside of the unpack root");
        } else if is_file {
            files += 1;
        }
    }
    tracing::info!(
        archive = %archive.display(),
        files,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Unpacked archive"
    );
    Ok(files)
}
