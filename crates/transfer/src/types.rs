use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;

/// Lifecycle milestone reported through [`EventCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadEvent {
    UploadStarted,
    ChunkUploaded,
    /// All chunks are staged, the final move has not started yet.
    ChunksComplete,
    MoveStarted,
    MoveComplete,
    UploadComplete,
    UploadFailed,
    /// Destination already holds an object of the same size.
    UploadSkipped,
    UploadPaused,
    /// Emitted both when a paused engine continues and when a transfer
    /// restarts from a checkpoint.
    UploadResumed,
}

impl UploadEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UploadStarted => "upload_started",
            Self::ChunkUploaded => "chunk_uploaded",
            Self::ChunksComplete => "chunks_complete",
            Self::MoveStarted => "move_started",
            Self::MoveComplete => "move_complete",
            Self::UploadComplete => "upload_complete",
            Self::UploadFailed => "upload_failed",
            Self::UploadSkipped => "upload_skipped",
            Self::UploadPaused => "upload_paused",
            Self::UploadResumed => "upload_resumed",
        }
    }
}

impl fmt::Display for UploadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control state of a single upload, owned by a
/// [`SessionController`](crate::SessionController).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Running,
    Paused,
    Cancelled,
}

/// Status of a session tracked by the [`UploadManager`](crate::UploadManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` once no engine will touch the session again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chunk progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub session_id: String,
    pub filename: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    /// 0.0 to 100.0.
    pub percentage: f64,
    /// 0-based index of the chunk that was just sent.
    pub chunk_index: u64,
    pub total_chunks: u64,
}

/// Lifecycle event report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    pub session_id: String,
    pub filename: String,
    pub remote_path: String,
    pub kind: UploadEvent,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Callback invoked after every uploaded chunk.
pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;

/// Callback invoked for every lifecycle event.
pub type EventCallback = Arc<dyn Fn(&EventInfo) + Send + Sync>;

/// Callback receiving resumable snapshots (every 10th chunk and on pause).
pub type CheckpointCallback = Arc<dyn Fn(Checkpoint) + Send + Sync>;

/// Result of a single-file upload that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The file was staged and moved into place.
    Uploaded {
        bytes: u64,
        /// Chunks sent by this invocation (excludes chunks from a checkpoint).
        chunks_sent: u64,
    },
    /// The destination already had the same size.
    Skipped,
}
