use crate::error::{ErrorKind, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
use std::path::Path;

const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Number of leading bytes needed to recognise every supported format.
pub(crate) const MAGIC_LEN: usize = 3;

/// Compression wrapped around a tar stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Plain `.tar`
    #[default]
    None,
    /// `.tar.gz` / `.tgz`
    Gzip,
    /// `.tar.bz2` / `.tbz2`
    Bzip2,
}

impl Compression {
    /// Detect the compression of a tar archive from its file name.
    ///
    /// Anything that is not recognisably a tar archive is rejected, rather
    /// than guessed at.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let name = path
            .as_ref()
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match name.as_str() {
            n if n.ends_with(".tar") => Ok(Compression::None),
            n if n.ends_with(".tar.gz") || n.ends_with(".tgz") => Ok(Compression::Gzip),
            n if n.ends_with(".tar.bz2") || n.ends_with(".tbz2") || n.ends_with(".tbz") => Ok(Compression::Bzip2),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(name)),
        }
    }

    /// Detect compression format from magic bytes. Plain tar has no magic
    /// at offset zero, so anything unrecognised is [`None`](Self::None).
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.starts_with(&BZIP2_MAGIC) {
            return Compression::Bzip2;
        }
        if bytes.starts_with(&GZIP_MAGIC) {
            return Compression::Gzip;
        }
        Compression::None
    }

    /// Verify that `bytes` start with the expected magic bytes for this format.
    #[must_use]
    pub fn check_magic_bytes(&self, bytes: &[u8]) -> bool {
        Self::from_magic_bytes(bytes) == *self
    }

    /// Wrap a reader with the matching decompressor.
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
