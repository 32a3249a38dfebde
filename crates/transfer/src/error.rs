//! Error types for uploads, checkpoints and session management.

use std::time::Duration;

use crate::transport::TransportError;
use crate::types::UploadStatus;

/// Errors produced by a single-file upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Non-retried transport failure (staging collection creation).
    #[error("{op} {path}: {source}")]
    Transport {
        op: &'static str,
        path: String,
        #[source]
        source: TransportError,
    },

    /// Local file access failure.
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A chunk failed on every attempt. `retries` excludes the first attempt.
    #[error("chunk upload {path}: {source} (after {retries} retries)")]
    ChunkUpload {
        path: String,
        retries: u32,
        #[source]
        source: TransportError,
    },

    /// The final move failed. The staged chunks are gone, so this is not
    /// resumable.
    #[error("finalize move {src} -> {dst}: {source}")]
    Finalize {
        src: String,
        dst: String,
        #[source]
        source: TransportError,
    },

    /// Cancelled through the session controller.
    #[error("upload cancelled")]
    Cancelled,

    /// The caller's cancellation token fired.
    #[error("upload aborted")]
    Aborted,

    #[error("upload paused for longer than {0:?}")]
    PausedTooLong(Duration),

    #[error("invalid remote path: {0}")]
    InvalidRemotePath(String),

    /// The local file no longer has the size recorded in the checkpoint.
    #[error("{path} changed since checkpoint: expected {expected} bytes, found {actual}")]
    SourceChanged {
        path: String,
        expected: u64,
        actual: u64,
    },
}

impl UploadError {
    /// Returns `true` when the staging collection was left in place and a
    /// checkpoint taken before the failure can continue the transfer.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::ChunkUpload { .. } | Self::Aborted | Self::PausedTooLong(_) | Self::Io { .. }
        )
    }
}

/// Errors produced while persisting or loading a checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced by [`UploadManager`](crate::UploadManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {id} cannot be {action} (current status: {status})")]
    InvalidState {
        id: String,
        status: UploadStatus,
        action: &'static str,
    },
}
