use super::{from_timestamp, to_i64, to_timestamp};
use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use grist_preprocess::FailureKind;
use std::time::Duration;
use time::UtcDateTime;

/// One output of preprocessing a source file.
///
/// Identified by `hash`, the lowercase hex BLAKE3 digest of `text`. For a
/// failed artifact `text` is the diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub relpath: String,
    /// Position of this output among the outputs of its source file.
    pub index: u32,
    pub hash: String,
    /// Digest of the raw bytes the artifact was produced from.
    pub input_hash: String,
    /// Unicode scalar values in `text`.
    pub char_count: u64,
    /// Segments of `text` split on `\n`; never zero.
    pub line_count: u64,
    pub text: String,
    pub failure: Option<FailureKind>,
    pub duration: Duration,
    pub created_at: UtcDateTime,
}
impl Artifact {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ArtifactRow {
    pub(crate) content_hash: String,
    pub(crate) relpath: String,
    pub(crate) artifact_index: i64,
    pub(crate) input_hash: String,
    pub(crate) char_count: i64,
    pub(crate) line_count: i64,
    pub(crate) text: String,
    pub(crate) success: bool,
    pub(crate) failure_kind: Option<String>,
    pub(crate) duration_ms: i64,
    pub(crate) created_at: i64,
}
impl TryFrom<&Artifact> for ArtifactRow {
    type Error = Error;
    fn try_from(artifact: &Artifact) -> Result<Self, Self::Error> {
        Ok(Self {
            content_hash: artifact.hash.clone(),
            relpath: artifact.relpath.clone(),
            artifact_index: i64::from(artifact.index),
            input_hash: artifact.input_hash.clone(),
            char_count: to_i64(artifact.char_count, "char count")?,
            line_count: to_i64(artifact.line_count, "line count")?,
            text: artifact.text.clone(),
            success: artifact.is_success(),
            failure_kind: artifact.failure.map(|kind| kind.as_str().to_string()),
            duration_ms: to_i64(artifact.duration.as_millis(), "duration")?,
            created_at: to_timestamp(artifact.created_at),
        })
    }
}
impl TryFrom<ArtifactRow> for Artifact {
    type Error = Error;
    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let failure = row
            .failure_kind
            .map(|kind| FailureKind::parse(&kind).ok_or_raise(|| ErrorKind::InvalidData("failure kind")))
            .transpose()?;
        if failure.is_some() == row.success {
            exn::bail!(ErrorKind::InvalidData("success flag"));
        }
        Ok(Self {
            relpath: row.relpath,
            index: u32::try_from(row.artifact_index).or_raise(|| ErrorKind::InvalidData("artifact index"))?,
            hash: row.content_hash,
            input_hash: row.input_hash,
            char_count: u64::try_from(row.char_count).or_raise(|| ErrorKind::InvalidData("char count"))?,
            line_count: u64::try_from(row.line_count).or_raise(|| ErrorKind::InvalidData("line count"))?,
            text: row.text,
            failure,
            duration: Duration::from_millis(u64::try_from(row.duration_ms).or_raise(|| ErrorKind::InvalidData("duration"))?),
            created_at: from_timestamp(row.created_at, "creation date")?,
        })
    }
}
