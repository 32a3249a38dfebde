use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer_pool::BufferPool;
use crate::checkpoint::Checkpoint;
use crate::controller::SessionController;
use crate::types::{CheckpointCallback, EventCallback, ProgressCallback};

/// Default chunk size: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Smallest accepted chunk size: 1 KiB.
pub const MIN_CHUNK_SIZE: u64 = 1024;

/// Largest accepted chunk size: 1 GiB.
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Slots in a buffer pool created by the configuration itself.
pub const DEFAULT_POOL_BUFFERS: usize = 4;

/// How long a paused upload waits for a resume before failing.
pub const DEFAULT_PAUSE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Immutable settings for one upload.
///
/// Every `with_*` builder consumes the value and returns a re-validated copy,
/// so a configuration handed to an engine never changes underneath it.
/// Cloning is cheap: the pool, controller and callbacks are shared handles.
#[derive(Clone)]
pub struct UploadConfig {
    chunk_size: u64,
    skip_if_same_size: bool,
    max_retries: u32,
    buffer_pool: Option<Arc<BufferPool>>,
    controller: Option<Arc<SessionController>>,
    on_progress: Option<ProgressCallback>,
    on_event: Option<EventCallback>,
    on_checkpoint: Option<CheckpointCallback>,
    resume_from: Option<Checkpoint>,
    pause_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_if_same_size: true,
            max_retries: DEFAULT_MAX_RETRIES,
            buffer_pool: Some(Arc::new(BufferPool::new(
                DEFAULT_CHUNK_SIZE as usize,
                DEFAULT_POOL_BUFFERS,
            ))),
            controller: None,
            on_progress: None,
            on_event: None,
            on_checkpoint: None,
            resume_from: None,
            pause_timeout: DEFAULT_PAUSE_TIMEOUT,
        }
        .validated()
    }
}

impl UploadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings restored from a checkpoint, with the checkpoint attached as
    /// the resume point. Pool, controller and callbacks are taken from `self`.
    pub fn for_checkpoint(self, checkpoint: Checkpoint) -> Self {
        Self {
            chunk_size: checkpoint.config_chunk_size,
            skip_if_same_size: checkpoint.config_skip_if_same_size,
            max_retries: checkpoint.config_max_retries,
            resume_from: Some(checkpoint),
            ..self
        }
        .validated()
    }

    /// Chunk size in bytes. 0 selects [`DEFAULT_CHUNK_SIZE`], other values
    /// are clamped to [`MIN_CHUNK_SIZE`]..=[`MAX_CHUNK_SIZE`].
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self.validated()
    }

    pub fn with_skip_if_same_size(mut self, skip: bool) -> Self {
        self.skip_if_same_size = skip;
        self
    }

    /// Additional attempts per chunk after the first, clamped to
    /// [`MAX_RETRIES_LIMIT`].
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.validated()
    }

    /// Shares `pool` between uploads. Replaced with a fresh pool when its
    /// buffer size does not match the chunk size.
    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.buffer_pool = Some(pool);
        self.validated()
    }

    /// Allocates a fresh buffer for every upload instead of reusing pooled
    /// ones.
    pub fn without_buffer_pool(mut self) -> Self {
        self.buffer_pool = None;
        self
    }

    pub fn with_controller(mut self, controller: Arc<SessionController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.on_progress = Some(cb);
        self
    }

    pub fn with_event_callback(mut self, cb: EventCallback) -> Self {
        self.on_event = Some(cb);
        self
    }

    pub fn with_checkpoint_callback(mut self, cb: CheckpointCallback) -> Self {
        self.on_checkpoint = Some(cb);
        self
    }

    pub fn with_resume_from(mut self, checkpoint: Checkpoint) -> Self {
        self.resume_from = Some(checkpoint);
        self
    }

    pub fn without_resume(mut self) -> Self {
        self.resume_from = None;
        self
    }

    pub fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout = timeout;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn skip_if_same_size(&self) -> bool {
        self.skip_if_same_size
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn buffer_pool(&self) -> Option<&Arc<BufferPool>> {
        self.buffer_pool.as_ref()
    }

    pub fn controller(&self) -> Option<&Arc<SessionController>> {
        self.controller.as_ref()
    }

    pub fn on_progress(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_ref()
    }

    pub fn on_event(&self) -> Option<&EventCallback> {
        self.on_event.as_ref()
    }

    pub fn on_checkpoint(&self) -> Option<&CheckpointCallback> {
        self.on_checkpoint.as_ref()
    }

    pub fn resume_from(&self) -> Option<&Checkpoint> {
        self.resume_from.as_ref()
    }

    pub fn pause_timeout(&self) -> Duration {
        self.pause_timeout
    }

    fn validated(mut self) -> Self {
        self.chunk_size = match self.chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
        };
        self.max_retries = self.max_retries.min(MAX_RETRIES_LIMIT);

        if self
            .buffer_pool
            .as_ref()
            .is_some_and(|p| p.buffer_size() as u64 != self.chunk_size)
        {
            self.buffer_pool = Some(Arc::new(BufferPool::new(
                self.chunk_size as usize,
                DEFAULT_POOL_BUFFERS,
            )));
        }
        self
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("chunk_size", &self.chunk_size)
            .field("skip_if_same_size", &self.skip_if_same_size)
            .field("max_retries", &self.max_retries)
            .field("buffer_pool", &self.buffer_pool)
            .field(
                "controller",
                &self.controller.as_ref().map(|c| c.session_id().to_string()),
            )
            .field("on_progress", &self.on_progress.is_some())
            .field("on_event", &self.on_event.is_some())
            .field("on_checkpoint", &self.on_checkpoint.is_some())
            .field("resume_from", &self.resume_from.as_ref().map(|c| &c.upload_id))
            .field("pause_timeout", &self.pause_timeout)
            .finish()
    }
}
