//! Caller-facing upload client: path handling, skip check, directory walks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::chunked::{ChunkedUploadEngine, Reporter, ensure_not_aborted};
use crate::config::UploadConfig;
use crate::controller::SessionController;
use crate::error::UploadError;
use crate::paths::{dir_of, join_many, path_join, sanitize_remote_path};
use crate::transport::Transport;
use crate::types::{UploadEvent, UploadOutcome};

/// Where a user's staged chunks and final files live on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    user: String,
    uploads_root: String,
    files_root: String,
}

impl RemoteLayout {
    /// Default roots: `uploads/<user>` and `files/<user>`.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            uploads_root: "uploads".into(),
            files_root: "files".into(),
        }
    }

    pub fn with_roots(
        mut self,
        uploads_root: impl Into<String>,
        files_root: impl Into<String>,
    ) -> Self {
        self.uploads_root = uploads_root.into();
        self.files_root = files_root.into();
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn uploads_root(&self) -> &str {
        &self.uploads_root
    }

    pub fn files_root(&self) -> &str {
        &self.files_root
    }

    /// Staging collection for `upload_id`.
    pub fn staging_path(&self, upload_id: &str) -> String {
        join_many(&[&self.uploads_root, &self.user, upload_id])
    }

    /// Full server path for a path relative to the user's files root.
    pub fn files_path(&self, relative: &str) -> String {
        join_many(&[&self.files_root, &self.user, relative])
    }
}

/// Counts from [`UploadClient::upload_dir`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirUploadSummary {
    pub directories: usize,
    pub uploaded: usize,
    pub skipped: usize,
    /// Remote paths of files whose upload failed.
    pub failed: Vec<String>,
}

/// Uploads files through a [`Transport`] on behalf of one user.
///
/// Clones share the transport and serialize their final moves, so sessions
/// started from one client never see each other's `OC-Total-Length`.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn Transport>,
    /// Held from setting the total-length header until it is cleared.
    header_lock: Arc<Mutex<()>>,
    layout: RemoteLayout,
    config: UploadConfig,
}

impl UploadClient {
    pub fn new(transport: Arc<dyn Transport>, user: impl Into<String>) -> Self {
        Self {
            transport,
            header_lock: Arc::new(Mutex::new(())),
            layout: RemoteLayout::new(user),
            config: UploadConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_layout(mut self, layout: RemoteLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_controller(mut self, controller: Arc<SessionController>) -> Self {
        self.config = self.config.with_controller(controller);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads one file to `dst_path` (relative to the user's files root, or
    /// a full `files/<user>/...` path).
    ///
    /// If the configuration carries a checkpoint, the transfer continues
    /// from it and the skip check is bypassed.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        dst_path: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let config = self.config_with_controller(self.config.clone());
        self.upload_with(&config, local_path, dst_path, cancel).await
    }

    /// Continues the transfer described by `checkpoint`, restoring its chunk
    /// size, skip flag and retry bound.
    pub async fn resume_upload(
        &self,
        checkpoint: Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let local_path = checkpoint.local_path.clone();
        let remote_path = checkpoint.remote_path.clone();
        let config = self.config_with_controller(self.config.clone().for_checkpoint(checkpoint));
        self.upload_with(&config, &local_path, &remote_path, cancel).await
    }

    /// Starts the upload on a separate task and returns a handle to pause,
    /// resume or cancel it.
    pub fn upload_file_resumable(
        &self,
        local_path: impl Into<PathBuf>,
        dst_path: impl Into<String>,
    ) -> UploadHandle {
        let controller = self
            .config
            .controller()
            .cloned()
            .unwrap_or_else(|| Arc::new(SessionController::standalone()));
        let client = self.clone().with_controller(Arc::clone(&controller));

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let local_path = local_path.into();
        let dst_path = dst_path.into();
        let task =
            tokio::spawn(async move { client.upload_file(&local_path, &dst_path, &token).await });

        UploadHandle {
            controller,
            cancel,
            task,
        }
    }

    /// Uploads every file under `local_dir` to `dst_dir`, creating a
    /// collection for each subdirectory.
    ///
    /// A failing file is logged and recorded in the summary; the walk goes on.
    /// Only an unreadable directory or the cancellation token stops it.
    pub async fn upload_dir(
        &self,
        local_dir: &Path,
        dst_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<DirUploadSummary, UploadError> {
        let mut summary = DirUploadSummary::default();
        let mut pending: Vec<(PathBuf, String)> =
            vec![(local_dir.to_path_buf(), dst_dir.to_string())];

        while let Some((dir, remote_dir)) = pending.pop() {
            ensure_not_aborted(cancel)?;

            if dir != local_dir {
                self.create_remote_dir(&remote_dir).await;
                summary.directories += 1;
            }

            let mut subdirs = Vec::new();
            for (path, name, is_dir) in read_dir_sorted(&dir).await? {
                let remote = path_join(&remote_dir, &name);
                if is_dir {
                    subdirs.push((path, remote));
                    continue;
                }
                match self.upload_file(&path, &remote, cancel).await {
                    Ok(UploadOutcome::Uploaded { .. }) => summary.uploaded += 1,
                    Ok(UploadOutcome::Skipped) => summary.skipped += 1,
                    Err(UploadError::Aborted) => return Err(UploadError::Aborted),
                    Err(e) => {
                        warn!(path = %remote, error = %e, "upload failed");
                        summary.failed.push(remote);
                    }
                }
            }
            // Reversed so subdirectories pop in name order.
            pending.extend(subdirs.into_iter().rev());
        }

        info!(
            uploaded = summary.uploaded,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "directory upload finished"
        );
        Ok(summary)
    }

    fn config_with_controller(&self, config: UploadConfig) -> UploadConfig {
        if config.controller().is_some() {
            config
        } else {
            config.with_controller(Arc::new(SessionController::standalone()))
        }
    }

    async fn upload_with(
        &self,
        config: &UploadConfig,
        local_path: &Path,
        dst_path: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        ensure_not_aborted(cancel)?;

        let session_id = config.controller().map(|c| c.session_id()).unwrap_or_default();
        let reporter = Reporter::new(config, session_id, local_path, dst_path);
        reporter.event(UploadEvent::UploadStarted, "Upload started", None);

        let result = self.upload_core(config, local_path, dst_path, &reporter, cancel).await;
        match &result {
            Ok(UploadOutcome::Uploaded { bytes, chunks_sent }) => {
                reporter.event(UploadEvent::UploadComplete, "Upload completed successfully", None);
                info!(
                    session = %session_id,
                    path = %dst_path,
                    bytes,
                    chunks_sent,
                    "upload complete"
                );
            }
            Ok(UploadOutcome::Skipped) => {}
            Err(e) => {
                reporter.event(UploadEvent::UploadFailed, "Upload failed", Some(e));
                warn!(session = %session_id, path = %dst_path, error = %e, "upload failed");
            }
        }
        result
    }

    async fn upload_core(
        &self,
        config: &UploadConfig,
        local_path: &Path,
        dst_path: &str,
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let clean = sanitize_remote_path(dst_path)?;
        let final_path = self.layout.files_path(&clean);

        if config.resume_from().is_none()
            && config.skip_if_same_size()
            && self.is_unchanged(local_path, &final_path, cancel).await?
        {
            debug!(path = %final_path, "skip unchanged");
            reporter.event(
                UploadEvent::UploadSkipped,
                "File already exists with same size",
                None,
            );
            return Ok(UploadOutcome::Skipped);
        }

        if let Some(dir) = dir_of(&final_path) {
            ensure_not_aborted(cancel)?;
            if let Err(e) = self.transport.create_collection(dir, true).await
                && !e.is_already_exists()
            {
                debug!(path = %dir, error = %e, "could not create destination directory");
            }
        }

        ChunkedUploadEngine::new(self.transport.as_ref(), &self.layout, config)
            .with_header_lock(Arc::clone(&self.header_lock))
            .run(local_path, &clean, cancel)
            .await
    }

    /// Returns `true` when the destination is a file with the local size.
    /// Lookup failures on either side count as "changed".
    async fn is_unchanged(
        &self,
        local_path: &Path,
        final_path: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, UploadError> {
        ensure_not_aborted(cancel)?;
        let remote = match self.transport.stat_object(final_path).await {
            Ok(Some(stat)) if !stat.is_dir => stat,
            _ => return Ok(false),
        };
        Ok(tokio::fs::metadata(local_path)
            .await
            .is_ok_and(|m| m.len() == remote.size))
    }

    async fn create_remote_dir(&self, remote_dir: &str) {
        let Ok(clean) = sanitize_remote_path(remote_dir) else {
            return;
        };
        let path = self.layout.files_path(&clean);
        if let Err(e) = self.transport.create_collection(&path, true).await
            && !e.is_already_exists()
        {
            debug!(path = %path, error = %e, "mkdir failed");
        }
    }
}

impl fmt::Debug for UploadClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadClient")
            .field("layout", &self.layout)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A detached upload started by [`UploadClient::upload_file_resumable`].
#[derive(Debug)]
pub struct UploadHandle {
    controller: Arc<SessionController>,
    cancel: CancellationToken,
    task: JoinHandle<Result<UploadOutcome, UploadError>>,
}

impl UploadHandle {
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Cancels through the controller; the staging collection is removed.
    pub fn cancel(&self) {
        self.controller.cancel();
    }

    /// Stops without cleanup, keeping the staging collection for a resume.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the upload task to end.
    pub async fn wait(self) -> Result<UploadOutcome, UploadError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(UploadError::Aborted),
        }
    }
}

/// Directory entries as `(path, name, is_dir)`, sorted by name.
async fn read_dir_sorted(dir: &Path) -> Result<Vec<(PathBuf, String, bool)>, UploadError> {
    let io_err = |e: std::io::Error| UploadError::Io {
        op: "walk",
        path: dir.display().to_string(),
        source: e,
    };

    let mut out = Vec::new();
    let mut rd = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = rd.next_entry().await.map_err(io_err)? {
        let is_dir = entry.file_type().await.map_err(io_err)?.is_dir();
        let name = entry.file_name().to_string_lossy().into_owned();
        out.push((entry.path(), name, is_dir));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}
