//! Chunked upload protocol: stage chunks, assemble with a final move.

use std::path::Path;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer_pool::PooledBuffer;
use crate::checkpoint::Checkpoint;
use crate::client::RemoteLayout;
use crate::config::UploadConfig;
use crate::controller::SessionController;
use crate::error::UploadError;
use crate::ids::{base_name, new_upload_id};
use crate::paths::path_join;
use crate::transport::{ASSEMBLED_OBJECT, TOTAL_LENGTH_HEADER, Transport};
use crate::types::{EventInfo, ProgressInfo, UploadEvent, UploadOutcome, UploadState};

/// A checkpoint is emitted after every this many chunks.
pub const CHECKPOINT_INTERVAL: u64 = 10;

/// Number of chunks needed for `file_size` bytes. 0 when `chunk_size` is 0.
pub fn calculate_chunks(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Fans events and progress out to the configured callbacks.
pub(crate) struct Reporter<'a> {
    config: &'a UploadConfig,
    session_id: String,
    filename: String,
    remote_path: String,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(
        config: &'a UploadConfig,
        session_id: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Self {
        Self {
            config,
            session_id: session_id.to_string(),
            filename: base_name(local_path),
            remote_path: remote_path.to_string(),
        }
    }

    pub(crate) fn event(
        &self,
        kind: UploadEvent,
        message: impl Into<String>,
        error: Option<&UploadError>,
    ) {
        let Some(cb) = self.config.on_event() else {
            return;
        };
        cb(&EventInfo {
            session_id: self.session_id.clone(),
            filename: self.filename.clone(),
            remote_path: self.remote_path.clone(),
            kind,
            message: message.into(),
            error: error.map(ToString::to_string),
        });
    }

    fn progress(&self, bytes_sent: u64, total_bytes: u64, chunk_index: u64, total_chunks: u64) {
        let Some(cb) = self.config.on_progress() else {
            return;
        };
        let percentage = if total_bytes == 0 {
            100.0
        } else {
            bytes_sent as f64 / total_bytes as f64 * 100.0
        };
        cb(&ProgressInfo {
            session_id: self.session_id.clone(),
            filename: self.filename.clone(),
            bytes_sent,
            total_bytes,
            percentage,
            chunk_index,
            total_chunks,
        });
    }
}

/// Counters for one engine run.
struct Transfer {
    upload_id: String,
    upload_base: String,
    file_size: u64,
    total_chunks: u64,
    bytes_uploaded: u64,
    chunks_uploaded: u64,
}

/// Drives one file through create → send chunks → finalize.
///
/// The engine borrows everything it needs; the configuration is never
/// modified. Cancellation comes from two places: the caller's token aborts
/// immediately and leaves the staging collection for a later resume, while
/// a controller cancel removes the staging collection first.
pub struct ChunkedUploadEngine<'a> {
    transport: &'a dyn Transport,
    layout: &'a RemoteLayout,
    config: &'a UploadConfig,
    controller: Arc<SessionController>,
    header_lock: Arc<Mutex<()>>,
}

impl<'a> ChunkedUploadEngine<'a> {
    /// Uses the configured controller, or a standalone one if none is set.
    pub fn new(
        transport: &'a dyn Transport,
        layout: &'a RemoteLayout,
        config: &'a UploadConfig,
    ) -> Self {
        let controller = config
            .controller()
            .cloned()
            .unwrap_or_else(|| Arc::new(SessionController::standalone()));
        Self {
            transport,
            layout,
            config,
            controller,
            header_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Shares the lock that guards the total-length header with every other
    /// engine using the same transport.
    pub fn with_header_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.header_lock = lock;
        self
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Uploads `local_path` to `remote_path`, a sanitized path relative to
    /// the user's files root.
    pub async fn run(
        &self,
        local_path: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let reporter = Reporter::new(
            self.config,
            self.controller.session_id(),
            local_path,
            remote_path,
        );
        let final_path = self.layout.files_path(remote_path);
        let chunk_size = self.config.chunk_size();

        let (upload_id, bytes_uploaded, chunks_uploaded) = match self.config.resume_from() {
            Some(cp) => {
                reporter.event(
                    UploadEvent::UploadResumed,
                    format!("Resuming from chunk {}", cp.chunks_uploaded),
                    None,
                );
                info!(
                    session = %self.controller.session_id(),
                    upload_id = %cp.upload_id,
                    chunk = cp.chunks_uploaded,
                    "resuming upload from checkpoint"
                );
                (cp.upload_id.clone(), cp.bytes_uploaded, cp.chunks_uploaded)
            }
            None => {
                let upload_id = new_upload_id();
                let base = self.layout.staging_path(&upload_id);
                ensure_not_aborted(cancel)?;
                if let Err(e) = self.transport.create_collection(&base, true).await {
                    if !e.is_already_exists() {
                        return Err(UploadError::Transport {
                            op: "mkcol",
                            path: base,
                            source: e,
                        });
                    }
                    debug!(path = %base, "staging collection already exists");
                }
                (upload_id, 0, 0)
            }
        };

        let local_display = local_path.display().to_string();
        let mut file = File::open(local_path).await.map_err(|e| UploadError::Io {
            op: "open",
            path: local_display.clone(),
            source: e,
        })?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| UploadError::Io {
                op: "stat",
                path: local_display.clone(),
                source: e,
            })?
            .len();

        if let Some(cp) = self.config.resume_from()
            && cp.file_size != file_size
        {
            warn!(
                path = %local_display,
                expected = cp.file_size,
                actual = file_size,
                "source changed since checkpoint"
            );
            return Err(UploadError::SourceChanged {
                path: local_display,
                expected: cp.file_size,
                actual: file_size,
            });
        }

        let start_offset = chunks_uploaded * chunk_size;
        if start_offset > 0 {
            file.seek(SeekFrom::Start(start_offset))
                .await
                .map_err(|e| UploadError::Io {
                    op: "seek",
                    path: format!("{local_display} @ {start_offset}"),
                    source: e,
                })?;
        }

        let mut state = Transfer {
            upload_base: self.layout.staging_path(&upload_id),
            upload_id,
            file_size,
            total_chunks: calculate_chunks(file_size, chunk_size),
            bytes_uploaded,
            chunks_uploaded,
        };

        let mut buf = match self.config.buffer_pool() {
            Some(pool) => pool.checkout(),
            None => PooledBuffer::unpooled(chunk_size as usize),
        };

        info!(
            session = %self.controller.session_id(),
            upload_id = %state.upload_id,
            size = file_size,
            chunks = state.total_chunks,
            "uploading {}",
            reporter.filename
        );

        let mut chunks_sent = 0u64;
        let mut offset = start_offset;
        while offset < file_size {
            ensure_not_aborted(cancel)?;
            self.check_controller(&state, local_path, remote_path, &reporter, cancel)
                .await?;

            let want = chunk_size.min(file_size - offset) as usize;
            let mut filled = 0;
            while filled < want {
                let n = file
                    .read(&mut buf[filled..want])
                    .await
                    .map_err(|e| UploadError::Io {
                        op: "read",
                        path: format!("{local_display} @ {offset}"),
                        source: e,
                    })?;
                if n == 0 {
                    break;
                }
                filled += n;
            }

            let chunk_path = path_join(&state.upload_base, &offset.to_string());
            self.send_chunk(&chunk_path, &buf[..filled], cancel).await?;

            state.bytes_uploaded += filled as u64;
            state.chunks_uploaded += 1;
            chunks_sent += 1;

            reporter.event(
                UploadEvent::ChunkUploaded,
                format!("Chunk {}/{} uploaded", state.chunks_uploaded, state.total_chunks),
                None,
            );
            reporter.progress(
                state.bytes_uploaded,
                file_size,
                state.chunks_uploaded - 1,
                state.total_chunks,
            );
            debug!(
                path = %chunk_path,
                bytes = filled,
                sent = state.bytes_uploaded,
                "chunk uploaded"
            );

            if state.chunks_uploaded % CHECKPOINT_INTERVAL == 0 {
                self.emit_checkpoint(&state, local_path, remote_path);
            }

            offset += chunk_size;
        }
        drop(buf);
        drop(file);

        self.finalize(&state, &final_path, &reporter, cancel).await?;

        Ok(UploadOutcome::Uploaded {
            bytes: file_size,
            chunks_sent,
        })
    }

    /// Handles a paused or cancelled controller before the next chunk.
    async fn check_controller(
        &self,
        state: &Transfer,
        local_path: &Path,
        remote_path: &str,
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        match self.controller.state() {
            UploadState::Running => return Ok(()),
            UploadState::Cancelled => return Err(self.cancelled(state).await),
            UploadState::Paused => {}
        }

        reporter.event(UploadEvent::UploadPaused, "Upload paused", None);
        info!(
            session = %self.controller.session_id(),
            chunk = state.chunks_uploaded,
            "upload paused"
        );
        self.emit_checkpoint(state, local_path, remote_path);

        let timeout = self.config.pause_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Aborted),
                _ = self.controller.wait_for_signal() => {}
                _ = sleep_until(deadline) => return Err(UploadError::PausedTooLong(timeout)),
            }

            match self.controller.state() {
                UploadState::Paused => continue,
                UploadState::Running => {
                    reporter.event(UploadEvent::UploadResumed, "Upload resumed", None);
                    info!(session = %self.controller.session_id(), "upload resumed");
                    return Ok(());
                }
                UploadState::Cancelled => return Err(self.cancelled(state).await),
            }
        }
    }

    async fn cancelled(&self, state: &Transfer) -> UploadError {
        info!(
            session = %self.controller.session_id(),
            upload_id = %state.upload_id,
            "upload cancelled"
        );
        self.cleanup(&state.upload_base).await;
        UploadError::Cancelled
    }

    /// Writes one chunk, retrying up to `max_retries` extra times.
    async fn send_chunk(
        &self,
        path: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let max_retries = self.config.max_retries();
        let mut attempt = 0;
        loop {
            ensure_not_aborted(cancel)?;
            match self.transport.write_object(path, data).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    warn!(path, attempt, max_retries, error = %e, "chunk upload failed, retrying");
                }
                Err(e) => {
                    return Err(UploadError::ChunkUpload {
                        path: path.to_string(),
                        retries: max_retries,
                        source: e,
                    });
                }
            }
        }
    }

    async fn finalize(
        &self,
        state: &Transfer,
        final_path: &str,
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        reporter.event(UploadEvent::ChunksComplete, "All chunks uploaded", None);
        reporter.event(UploadEvent::MoveStarted, "Starting final move operation", None);

        let src = path_join(&state.upload_base, ASSEMBLED_OBJECT);
        let result = {
            let _header = self.header_lock.lock().await;
            ensure_not_aborted(cancel)?;
            self.transport
                .set_protocol_header(TOTAL_LENGTH_HEADER, &state.file_size.to_string());
            let result = self.transport.rename_object(&src, final_path, true).await;
            self.transport.set_protocol_header(TOTAL_LENGTH_HEADER, "");
            result
        };

        if let Err(e) = result {
            warn!(src = %src, dst = %final_path, error = %e, "final move failed");
            self.cleanup(&state.upload_base).await;
            return Err(UploadError::Finalize {
                src,
                dst: final_path.to_string(),
                source: e,
            });
        }

        reporter.event(UploadEvent::MoveComplete, "Move operation completed", None);
        self.cleanup(&state.upload_base).await;
        info!(
            session = %self.controller.session_id(),
            path = %final_path,
            size = state.file_size,
            "upload assembled"
        );
        Ok(())
    }

    fn emit_checkpoint(&self, state: &Transfer, local_path: &Path, remote_path: &str) {
        let Some(cb) = self.config.on_checkpoint() else {
            return;
        };
        cb(Checkpoint {
            local_path: local_path.to_path_buf(),
            remote_path: remote_path.to_string(),
            upload_id: state.upload_id.clone(),
            file_size: state.file_size,
            chunk_size: self.config.chunk_size(),
            bytes_uploaded: state.bytes_uploaded,
            chunks_uploaded: state.chunks_uploaded,
            total_chunks: state.total_chunks,
            timestamp: chrono::Utc::now(),
            config_chunk_size: self.config.chunk_size(),
            config_skip_if_same_size: self.config.skip_if_same_size(),
            config_max_retries: self.config.max_retries(),
        });
    }

    async fn cleanup(&self, upload_base: &str) {
        if let Err(e) = self.transport.remove_all(upload_base).await {
            debug!(path = %upload_base, error = %e, "staging cleanup failed");
        }
    }
}

pub(crate) fn ensure_not_aborted(cancel: &CancellationToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        Err(UploadError::Aborted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use crate::testing::{MockTransport, Op};
    use crate::transport::TransportError;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    fn write_file(dir: &TempDir, name: &str, len: u64) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn staging_base(mock: &MockTransport) -> String {
        match mock.ops().first() {
            Some(Op::Mkcol(path)) => path.clone(),
            other => panic!("expected staging mkcol first, got {other:?}"),
        }
    }

    fn checkpoint_at(
        local: &Path,
        upload_id: &str,
        chunks: u64,
        chunk_size: u64,
        file_size: u64,
    ) -> Checkpoint {
        Checkpoint {
            local_path: local.to_path_buf(),
            remote_path: "data.bin".into(),
            upload_id: upload_id.into(),
            file_size,
            chunk_size,
            bytes_uploaded: chunks * chunk_size,
            chunks_uploaded: chunks,
            total_chunks: calculate_chunks(file_size, chunk_size),
            timestamp: chrono::Utc::now(),
            config_chunk_size: chunk_size,
            config_skip_if_same_size: true,
            config_max_retries: 3,
        }
    }

    #[test]
    fn chunk_counts() {
        assert_eq!(calculate_chunks(0, 10 * MIB), 0);
        assert_eq!(calculate_chunks(1, 10 * MIB), 1);
        assert_eq!(calculate_chunks(10 * MIB, 10 * MIB), 1);
        assert_eq!(calculate_chunks(10 * MIB + 1, 10 * MIB), 2);
        assert_eq!(calculate_chunks(25 * MIB, 10 * MIB), 3);
        assert_eq!(calculate_chunks(100, 0), 0);
    }

    #[test]
    fn aborted_only_when_cancelled() {
        let token = CancellationToken::new();
        assert!(ensure_not_aborted(&token).is_ok());
        token.cancel();
        assert!(matches!(
            ensure_not_aborted(&token),
            Err(UploadError::Aborted)
        ));
    }

    #[test]
    fn reporter_fills_event_fields() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cfg = UploadConfig::default()
            .with_event_callback(Arc::new(move |e: &EventInfo| {
                sink.lock().unwrap().push(e.clone())
            }));
        let reporter = Reporter::new(&cfg, "s1", Path::new("/data/a.bin"), "docs/a.bin");
        reporter.event(
            UploadEvent::UploadFailed,
            "Upload failed",
            Some(&UploadError::Cancelled),
        );

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, "s1");
        assert_eq!(events[0].filename, "a.bin");
        assert_eq!(events[0].remote_path, "docs/a.bin");
        assert_eq!(events[0].error.as_deref(), Some("upload cancelled"));
    }

    #[tokio::test]
    async fn uploads_25_mib_in_three_chunks() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "big.bin", 25 * MIB);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        let cfg = UploadConfig::default()
            .with_chunk_size(10 * MIB)
            .with_progress_callback(Arc::new(move |p: &ProgressInfo| {
                sink.lock().unwrap().push((p.percentage, p.chunk_index, p.total_chunks));
            }));

        let outcome = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "big.bin", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                bytes: 25 * MIB,
                chunks_sent: 3
            }
        );

        let base = staging_base(&mock);
        assert!(base.starts_with("uploads/alice/web-file-upload-"));
        assert_eq!(
            mock.writes(),
            vec![
                (format!("{base}/0"), (10 * MIB) as usize),
                (format!("{base}/{}", 10 * MIB), (10 * MIB) as usize),
                (format!("{base}/{}", 20 * MIB), (5 * MIB) as usize),
            ]
        );

        let renames: Vec<_> = mock
            .ops()
            .into_iter()
            .filter(|op| matches!(op, Op::Rename { .. }))
            .collect();
        assert_eq!(
            renames,
            vec![Op::Rename {
                src: format!("{base}/.file"),
                dst: "files/alice/big.bin".into(),
                total_length: Some((25 * MIB).to_string()),
            }]
        );
        assert_eq!(mock.header(TOTAL_LENGTH_HEADER), None);
        assert_eq!(mock.ops().last(), Some(&Op::RemoveAll(base)));

        let progress = progress.lock().unwrap();
        assert_eq!(
            *progress,
            vec![(40.0, 0, 3), (80.0, 1, 3), (100.0, 2, 3)]
        );
    }

    #[tokio::test]
    async fn retry_exhaustion_keeps_staging() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.bin", 3000);
        let mock = MockTransport::new();
        mock.fail_writes(u32::MAX);
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default().with_chunk_size(KIB).with_max_retries(2);

        let err = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &CancellationToken::new())
            .await
            .unwrap_err();

        let base = staging_base(&mock);
        match &err {
            UploadError::ChunkUpload { path, retries, .. } => {
                assert_eq!(path, &format!("{base}/0"));
                assert_eq!(*retries, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_resumable());
        assert_eq!(mock.writes().len(), 3);
        assert_eq!(mock.count(|op| matches!(op, Op::RemoveAll(_))), 0);
        assert_eq!(mock.count(|op| matches!(op, Op::Rename { .. })), 0);
    }

    #[tokio::test]
    async fn transient_write_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.bin", 2 * KIB);
        let mock = MockTransport::new();
        mock.fail_writes(1);
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default().with_chunk_size(KIB);

        ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &CancellationToken::new())
            .await
            .unwrap();

        let base = staging_base(&mock);
        let paths: Vec<_> = mock.writes().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                format!("{base}/0"),
                format!("{base}/0"),
                format!("{base}/1024"),
            ]
        );
    }

    #[tokio::test]
    async fn resume_skips_mkcol_and_starts_at_offset() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "data.bin", 3000);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cp = checkpoint_at(&local, "web-file-upload-42", 2, KIB, 3000);
        let cfg = UploadConfig::default()
            .with_event_callback(Arc::new(move |e: &EventInfo| {
                sink.lock().unwrap().push((e.kind, e.message.clone()));
            }))
            .for_checkpoint(cp);

        let outcome = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "data.bin", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                bytes: 3000,
                chunks_sent: 1
            }
        );

        assert_eq!(mock.count(|op| matches!(op, Op::Mkcol(_))), 0);
        assert_eq!(
            mock.writes(),
            vec![("uploads/alice/web-file-upload-42/2048".to_string(), 952)]
        );
        let events = events.lock().unwrap();
        assert_eq!(
            events[0],
            (UploadEvent::UploadResumed, "Resuming from chunk 2".to_string())
        );
    }

    #[tokio::test]
    async fn resume_refuses_resized_source() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "data.bin", 3500);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");

        let cfg = UploadConfig::default()
            .for_checkpoint(checkpoint_at(&local, "web-file-upload-42", 2, KIB, 3000));
        let err = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "data.bin", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::SourceChanged {
                expected: 3000,
                actual: 3500,
                ..
            }
        ));
        assert!(!err.is_resumable());
        assert!(mock.ops().is_empty());
    }

    #[tokio::test]
    async fn uploads_without_buffer_pool() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "plain.bin", 2500);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default()
            .with_chunk_size(KIB)
            .without_buffer_pool();
        assert!(cfg.buffer_pool().is_none());

        ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "plain.bin", &CancellationToken::new())
            .await
            .unwrap();

        let lens: Vec<usize> = mock.writes().into_iter().map(|(_, len)| len).collect();
        assert_eq!(lens, vec![1024, 1024, 452]);
    }

    /// Runs an upload of a 3 KiB file on its own task. The controller is
    /// paused as soon as the first chunk is reported.
    struct PausedRun {
        mock: Arc<MockTransport>,
        controller: Arc<SessionController>,
        events: mpsc::UnboundedReceiver<UploadEvent>,
        checkpoints: Arc<Mutex<Vec<Checkpoint>>>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Result<UploadOutcome, UploadError>>,
        _dir: TempDir,
    }

    impl PausedRun {
        fn start() -> Self {
            let dir = TempDir::new().unwrap();
            let local = write_file(&dir, "data.bin", 3 * KIB);
            let mock = Arc::new(MockTransport::new());
            let controller = Arc::new(SessionController::new("s1"));
            let (tx, events) = mpsc::unbounded_channel();
            let checkpoints = Arc::new(Mutex::new(Vec::new()));

            let pauser = Arc::clone(&controller);
            let sink = Arc::clone(&checkpoints);
            let cfg = UploadConfig::default()
                .with_chunk_size(KIB)
                .with_controller(Arc::clone(&controller))
                .with_progress_callback(Arc::new(move |p: &ProgressInfo| {
                    if p.chunk_index == 0 {
                        pauser.pause();
                    }
                }))
                .with_event_callback(Arc::new(move |e: &EventInfo| {
                    let _ = tx.send(e.kind);
                }))
                .with_checkpoint_callback(Arc::new(move |cp: Checkpoint| {
                    sink.lock().unwrap().push(cp);
                }));

            let cancel = CancellationToken::new();
            let task = {
                let mock = Arc::clone(&mock);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let layout = RemoteLayout::new("alice");
                    ChunkedUploadEngine::new(mock.as_ref(), &layout, &cfg)
                        .run(&local, "data.bin", &cancel)
                        .await
                })
            };

            Self {
                mock,
                controller,
                events,
                checkpoints,
                cancel,
                task,
                _dir: dir,
            }
        }

        async fn wait_for(&mut self, kind: UploadEvent) {
            let wait = async {
                while let Some(seen) = self.events.recv().await {
                    if seen == kind {
                        return;
                    }
                }
                panic!("event stream ended before {kind}");
            };
            tokio::time::timeout(Duration::from_secs(5), wait)
                .await
                .expect("timed out waiting for event");
        }
    }

    #[tokio::test]
    async fn pause_after_first_chunk_then_resume() {
        let mut run = PausedRun::start();
        run.wait_for(UploadEvent::UploadPaused).await;

        assert_eq!(run.mock.writes().len(), 1);
        {
            let checkpoints = run.checkpoints.lock().unwrap();
            assert_eq!(checkpoints.len(), 1);
            assert_eq!(checkpoints[0].chunks_uploaded, 1);
            assert_eq!(checkpoints[0].bytes_uploaded, KIB);
            assert_eq!(checkpoints[0].resume_offset(), KIB);
        }

        run.controller.resume();
        run.wait_for(UploadEvent::UploadResumed).await;
        let outcome = run.task.await.unwrap().unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded { chunks_sent: 3, .. }));

        let base = staging_base(&run.mock);
        let paths: Vec<_> = run.mock.writes().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                format!("{base}/0"),
                format!("{base}/1024"),
                format!("{base}/2048"),
            ]
        );
    }

    #[tokio::test]
    async fn cancel_while_paused_cleans_up() {
        let mut run = PausedRun::start();
        run.wait_for(UploadEvent::UploadPaused).await;

        run.controller.cancel();
        let err = run.task.await.unwrap().unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));

        let base = staging_base(&run.mock);
        assert_eq!(run.mock.ops().last(), Some(&Op::RemoveAll(base)));
        assert_eq!(run.mock.count(|op| matches!(op, Op::Rename { .. })), 0);
    }

    #[tokio::test]
    async fn token_while_paused_aborts_without_cleanup() {
        let mut run = PausedRun::start();
        run.wait_for(UploadEvent::UploadPaused).await;

        run.cancel.cancel();
        let err = run.task.await.unwrap().unwrap_err();
        assert!(matches!(err, UploadError::Aborted));
        assert_eq!(run.mock.count(|op| matches!(op, Op::RemoveAll(_))), 0);
        assert_eq!(run.mock.writes().len(), 1);
    }

    #[tokio::test]
    async fn pause_timeout_fails() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.bin", 2 * KIB);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");
        let controller = Arc::new(SessionController::new("s1"));
        controller.pause();
        let cfg = UploadConfig::default()
            .with_chunk_size(KIB)
            .with_controller(controller)
            .with_pause_timeout(Duration::from_millis(50));

        let err = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PausedTooLong(d) if d == Duration::from_millis(50)));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn finalize_failure_cleans_up() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.bin", 2 * KIB);
        let mock = MockTransport::new();
        mock.fail_rename(TransportError::with_status(400, "Bad Request"));
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default().with_chunk_size(KIB);

        let err = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &CancellationToken::new())
            .await
            .unwrap_err();

        let base = staging_base(&mock);
        match &err {
            UploadError::Finalize { src, dst, .. } => {
                assert_eq!(src, &format!("{base}/.file"));
                assert_eq!(dst, "files/alice/a.bin");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_resumable());
        assert_eq!(mock.ops().last(), Some(&Op::RemoveAll(base)));
        assert_eq!(mock.header(TOTAL_LENGTH_HEADER), None);
    }

    #[tokio::test]
    async fn mkcol_failure_aborts_but_existing_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.bin", 100);
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default();

        let mock = MockTransport::new();
        mock.fail_mkcol(TransportError::with_status(507, "Insufficient Storage"));
        let err = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport { op: "mkcol", .. }));
        assert!(mock.writes().is_empty());

        let mock = MockTransport::new();
        mock.fail_mkcol(TransportError::with_status(405, "Method Not Allowed"));
        ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(mock.writes().len(), 1);
    }

    #[tokio::test]
    async fn empty_file_goes_straight_to_finalize() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "empty.bin", 0);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default();

        let outcome = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "empty.bin", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                bytes: 0,
                chunks_sent: 0
            }
        );
        assert!(mock.writes().is_empty());
        assert!(mock.ops().iter().any(|op| matches!(
            op,
            Op::Rename { total_length: Some(len), .. } if len == "0"
        )));
    }

    #[tokio::test]
    async fn cancelled_token_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.bin", 100);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default();
        let token = CancellationToken::new();
        token.cancel();

        let err = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Aborted));
        assert!(mock.ops().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_every_tenth_chunk() {
        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "a.bin", 20 * KIB + 1);
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cfg = UploadConfig::default()
            .with_chunk_size(KIB)
            .with_checkpoint_callback(Arc::new(move |cp: Checkpoint| {
                sink.lock().unwrap().push(cp);
            }));

        ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&local, "a.bin", &CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let chunks: Vec<_> = seen.iter().map(|cp| cp.chunks_uploaded).collect();
        assert_eq!(chunks, vec![10, 20]);
        assert!(seen.iter().all(|cp| cp.total_chunks == 21));
        assert_eq!(seen[1].bytes_uploaded, 20 * KIB);
        assert_eq!(seen[0].remote_path, "a.bin");
    }

    #[tokio::test]
    async fn missing_local_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let mock = MockTransport::new();
        let layout = RemoteLayout::new("alice");
        let cfg = UploadConfig::default();

        let err = ChunkedUploadEngine::new(&mock, &layout, &cfg)
            .run(&dir.path().join("absent"), "absent", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io { op: "open", .. }));
    }
}
