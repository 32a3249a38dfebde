//! Resumable chunked uploads to a WebDAV-style store.
//!
//! A file is staged as numbered chunks in `uploads/<user>/<upload-id>/` and
//! then assembled into `files/<user>/<path>` with a single move. Uploads can
//! be paused, resumed and cancelled through a [`SessionController`], restarted
//! from a [`Checkpoint`], and run side by side under an [`UploadManager`].

mod buffer_pool;
mod checkpoint;
mod chunked;
mod client;
mod config;
mod controller;
mod error;
mod ids;
mod manager;
pub mod paths;
#[cfg(test)]
mod testing;
mod transport;
mod types;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use checkpoint::Checkpoint;
pub use chunked::{CHECKPOINT_INTERVAL, ChunkedUploadEngine, calculate_chunks};
pub use client::{DirUploadSummary, RemoteLayout, UploadClient, UploadHandle};
pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_PAUSE_TIMEOUT, DEFAULT_POOL_BUFFERS,
    MAX_CHUNK_SIZE, MAX_RETRIES_LIMIT, MIN_CHUNK_SIZE, UploadConfig,
};
pub use controller::SessionController;
pub use error::{CheckpointError, ManagerError, UploadError};
pub use manager::{UploadManager, UploadSession};
pub use transport::{
    ASSEMBLED_OBJECT, ObjectStat, TOTAL_LENGTH_HEADER, Transport, TransportError,
    TransportErrorKind, TransportFuture,
};
pub use types::{
    CheckpointCallback, EventCallback, EventInfo, ProgressCallback, ProgressInfo, UploadEvent,
    UploadOutcome, UploadState, UploadStatus,
};
