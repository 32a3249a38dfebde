//! Resumable upload snapshots and their JSON persistence.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Everything needed to continue an interrupted upload.
///
/// The configuration values are copied in because callbacks and pools cannot
/// be persisted. The timestamp is stored as whole Unix seconds, so a
/// loaded checkpoint carries the original timestamp truncated to the second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub local_path: PathBuf,
    /// Destination relative to the user's files root.
    pub remote_path: String,
    /// Staging collection id on the server.
    pub upload_id: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub bytes_uploaded: u64,
    pub chunks_uploaded: u64,
    pub total_chunks: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub config_chunk_size: u64,
    pub config_skip_if_same_size: bool,
    pub config_max_retries: u32,
}

impl Checkpoint {
    /// Byte offset the next chunk starts at.
    pub fn resume_offset(&self) -> u64 {
        self.chunks_uploaded * self.chunk_size
    }

    /// Returns `true` if every chunk was already sent.
    pub fn is_complete(&self) -> bool {
        self.chunks_uploaded >= self.total_chunks
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the checkpoint to `path` atomically (sibling temp file, then
    /// rename).
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = self.to_json()?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = temp_path(path);
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), upload_id = %self.upload_id, "checkpoint saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".into());
    path.with_file_name(format!(".{name}.tmp"))
}
