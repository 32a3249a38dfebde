//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use chunkdav_fs_store::FsStore;
use chunkdav_transfer::{
    Checkpoint, EventInfo, ProgressInfo, SessionController, UploadClient, UploadConfig,
    UploadError, UploadEvent, UploadManager, UploadOutcome, UploadStatus, paths,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CliConfig;

/// Builds a client for the configured store and user.
pub fn client(config: &CliConfig) -> anyhow::Result<UploadClient> {
    std::fs::create_dir_all(&config.store_root).with_context(|| {
        format!("failed to create store root {}", config.store_root.display())
    })?;
    let store = Arc::new(FsStore::new(&config.store_root));
    let upload_config = config
        .upload_config()
        .with_event_callback(Arc::new(log_event))
        .with_progress_callback(Arc::new(log_progress));
    Ok(UploadClient::new(store, config.user.clone()).with_config(upload_config))
}

fn log_event(e: &EventInfo) {
    match e.kind {
        UploadEvent::ChunkUploaded => {
            debug!(session = %e.session_id, file = %e.filename, "{}", e.message)
        }
        UploadEvent::UploadFailed => warn!(
            session = %e.session_id,
            file = %e.filename,
            error = e.error.as_deref().unwrap_or(""),
            "{}",
            e.message
        ),
        kind => info!(session = %e.session_id, file = %e.filename, event = %kind, "{}", e.message),
    }
}

fn log_progress(p: &ProgressInfo) {
    debug!(
        session = %p.session_id,
        file = %p.filename,
        sent = p.bytes_sent,
        total = p.total_bytes,
        "{:.1}% ({}/{})",
        p.percentage,
        p.chunk_index + 1,
        p.total_chunks
    );
}

/// Default checkpoint location for `local`: a hidden sibling file.
pub fn default_checkpoint_path(local: &Path) -> PathBuf {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into());
    local.with_file_name(format!(".{name}.chunkdav-checkpoint"))
}

/// Wires checkpoint persistence and Ctrl-C handling into an upload.
///
/// The first Ctrl-C pauses the controller so the engine writes a final
/// checkpoint, then aborts. A second Ctrl-C aborts immediately.
struct Interruptible {
    controller: Arc<SessionController>,
    cancel: CancellationToken,
    interrupted: Arc<AtomicBool>,
}

impl Interruptible {
    fn new() -> Self {
        Self {
            controller: Arc::new(SessionController::standalone()),
            cancel: CancellationToken::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn configure(&self, config: UploadConfig, checkpoint_path: PathBuf) -> UploadConfig {
        let cancel = self.cancel.clone();
        let interrupted = Arc::clone(&self.interrupted);
        config
            .with_controller(Arc::clone(&self.controller))
            .with_checkpoint_callback(Arc::new(move |cp: Checkpoint| {
                match cp.save(&checkpoint_path) {
                    Ok(()) => info!(
                        path = %checkpoint_path.display(),
                        chunks = cp.chunks_uploaded,
                        total = cp.total_chunks,
                        "checkpoint saved"
                    ),
                    Err(e) => warn!(
                        path = %checkpoint_path.display(),
                        error = %e,
                        "checkpoint not saved"
                    ),
                }
                if interrupted.load(Ordering::SeqCst) {
                    cancel.cancel();
                }
            }))
    }

    fn spawn_signal_handler(&self) {
        let controller = Arc::clone(&self.controller);
        let cancel = self.cancel.clone();
        let interrupted = Arc::clone(&self.interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("interrupt received, saving checkpoint (press Ctrl-C again to abort)");
            interrupted.store(true, Ordering::SeqCst);
            controller.pause();

            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
}

pub async fn upload(
    config: &CliConfig,
    local: PathBuf,
    remote: String,
    checkpoint: Option<PathBuf>,
) -> anyhow::Result<()> {
    let checkpoint_path = checkpoint.unwrap_or_else(|| default_checkpoint_path(&local));
    let base = client(config)?;
    let run = Interruptible::new();
    let client = base
        .clone()
        .with_config(run.configure(base.config().clone(), checkpoint_path.clone()));
    run.spawn_signal_handler();

    let result = client.upload_file(&local, &remote, &run.cancel).await;
    finish(result, &checkpoint_path, &local, &remote)
}

pub async fn resume(config: &CliConfig, checkpoint_path: PathBuf) -> anyhow::Result<()> {
    let checkpoint = Checkpoint::load(&checkpoint_path)
        .with_context(|| format!("failed to load checkpoint {}", checkpoint_path.display()))?;
    info!(
        upload_id = %checkpoint.upload_id,
        chunk = checkpoint.chunks_uploaded,
        total = checkpoint.total_chunks,
        "resuming {}",
        checkpoint.local_path.display()
    );

    let local = checkpoint.local_path.clone();
    let remote = checkpoint.remote_path.clone();
    let base = client(config)?;
    let run = Interruptible::new();
    let client = base
        .clone()
        .with_config(run.configure(base.config().clone(), checkpoint_path.clone()));
    run.spawn_signal_handler();

    let result = client.resume_upload(checkpoint, &run.cancel).await;
    finish(result, &checkpoint_path, &local, &remote)
}

fn finish(
    result: Result<UploadOutcome, UploadError>,
    checkpoint_path: &Path,
    local: &Path,
    remote: &str,
) -> anyhow::Result<()> {
    match result {
        Ok(UploadOutcome::Uploaded { bytes, chunks_sent }) => {
            remove_checkpoint(checkpoint_path);
            println!(
                "uploaded {} -> {remote} ({bytes} bytes, {chunks_sent} chunks)",
                local.display()
            );
            Ok(())
        }
        Ok(UploadOutcome::Skipped) => {
            remove_checkpoint(checkpoint_path);
            println!("skipped {} (same size at {remote})", local.display());
            Ok(())
        }
        Err(e) if e.is_resumable() && checkpoint_path.exists() => Err(anyhow::anyhow!(
            "{e}\nresume with: chunkdav resume --checkpoint {}",
            checkpoint_path.display()
        )),
        Err(e) => {
            remove_checkpoint(checkpoint_path);
            Err(e.into())
        }
    }
}

fn remove_checkpoint(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "checkpoint removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove checkpoint"),
    }
}

pub async fn upload_dir(config: &CliConfig, local: PathBuf, remote: String) -> anyhow::Result<()> {
    let client = client(config)?;
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            token.cancel();
        }
    });

    let summary = client.upload_dir(&local, &remote, &cancel).await?;
    println!(
        "{} uploaded, {} skipped, {} failed, {} directories",
        summary.uploaded,
        summary.skipped,
        summary.failed.len(),
        summary.directories
    );
    for path in &summary.failed {
        println!("  failed: {path}");
    }
    if summary.failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} file(s) failed", summary.failed.len())
    }
}

/// Uploads several files side by side under one manager.
pub async fn batch(config: &CliConfig, files: Vec<PathBuf>, dest: String) -> anyhow::Result<()> {
    let client = client(config)?;
    let manager = UploadManager::new();

    let mut ids = Vec::with_capacity(files.len());
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("not a file path: {}", file.display()))?;
        let remote = paths::path_join(&dest, &name);
        let session = manager.add_upload_session(file, remote, client.clone()).await;
        ids.push(session.id);
    }
    for id in &ids {
        manager.start_upload(id).await?;
    }

    let handle = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping all uploads");
            handle.shutdown();
        }
    });

    let mut failed = 0;
    for id in &ids {
        let status = manager.wait_upload(id).await?;
        let session = manager.get_upload_session(id).await?;
        match status {
            UploadStatus::Completed => println!("{:>9}  {}", status.as_str(), session.remote_path),
            _ => {
                failed += 1;
                println!(
                    "{:>9}  {}  {}",
                    status.as_str(),
                    session.remote_path,
                    session.error.unwrap_or_default()
                );
            }
        }
    }

    if failed == 0 {
        Ok(())
    } else {
        anyhow::bail!("{failed} upload(s) did not complete")
    }
}

pub fn inspect(checkpoint_path: &Path, json: bool) -> anyhow::Result<()> {
    let cp = Checkpoint::load(checkpoint_path)
        .with_context(|| format!("failed to load checkpoint {}", checkpoint_path.display()))?;

    if json {
        println!("{}", cp.to_json()?);
        return Ok(());
    }

    let percent = if cp.file_size == 0 {
        100.0
    } else {
        cp.bytes_uploaded as f64 / cp.file_size as f64 * 100.0
    };
    println!("local:      {}", cp.local_path.display());
    println!("remote:     {}", cp.remote_path);
    println!("upload id:  {}", cp.upload_id);
    println!(
        "progress:   {}/{} chunks, {}/{} bytes ({percent:.1}%)",
        cp.chunks_uploaded, cp.total_chunks, cp.bytes_uploaded, cp.file_size
    );
    println!("chunk size: {}", cp.chunk_size);
    println!("resume at:  byte {}", cp.resume_offset());
    println!("saved:      {}", cp.timestamp.to_rfc3339());
    println!(
        "settings:   skip_if_same_size={} max_retries={}",
        cp.config_skip_if_same_size, cp.config_max_retries
    );
    Ok(())
}
