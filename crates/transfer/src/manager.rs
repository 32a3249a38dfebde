//! Registry of named upload sessions with per-session and global control.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::UploadClient;
use crate::controller::SessionController;
use crate::error::{ManagerError, UploadError};
use crate::ids::new_session_id;
use crate::types::UploadStatus;

/// Snapshot of a managed upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    /// Client whose configuration carries this session's controller.
    pub client: UploadClient,
    pub controller: Arc<SessionController>,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Error text of a failed upload.
    pub error: Option<String>,
}

impl UploadSession {
    fn set_status(&mut self, status: UploadStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

struct SessionEntry {
    session: UploadSession,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub(crate) struct ManagerShared {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    globally_paused: AtomicBool,
    shutdown: CancellationToken,
}

/// Runs uploads as independent tasks and tracks their status.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct UploadManager {
    shared: Arc<ManagerShared>,
}

impl UploadManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an upload in `Queued` state. `client`'s configuration is
    /// copied and bound to a new controller for this session.
    pub async fn add_upload_session(
        &self,
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        client: UploadClient,
    ) -> UploadSession {
        let local_path = local_path.into();
        let id = new_session_id(&local_path);
        let controller = Arc::new(SessionController::managed(
            id.clone(),
            Arc::downgrade(&self.shared),
        ));
        let now = Utc::now();
        let session = UploadSession {
            id: id.clone(),
            local_path,
            remote_path: remote_path.into(),
            client: client.with_controller(Arc::clone(&controller)),
            controller,
            status: UploadStatus::Queued,
            created_at: now,
            updated_at: now,
            error: None,
        };

        self.shared.sessions.write().await.insert(
            id.clone(),
            SessionEntry {
                session: session.clone(),
                task: None,
            },
        );
        info!(session = %id, "upload session added");
        session
    }

    /// Launches a queued session, or resumes a paused one.
    pub async fn start_upload(&self, id: &str) -> Result<(), ManagerError> {
        let mut sessions = self.shared.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;

        match entry.session.status {
            UploadStatus::Queued => {
                entry.session.set_status(UploadStatus::Running);
                let session = entry.session.clone();
                let shared = Arc::downgrade(&self.shared);
                let cancel = self.shared.shutdown.child_token();
                entry.task = Some(tokio::spawn(run_session(shared, session, cancel)));
                info!(session = %id, "upload started");
            }
            UploadStatus::Paused => {
                entry.session.controller.resume();
                entry.session.set_status(UploadStatus::Running);
                info!(session = %id, "upload restarted from pause");
            }
            status => {
                return Err(ManagerError::InvalidState {
                    id: id.to_string(),
                    status,
                    action: "started",
                });
            }
        }
        Ok(())
    }

    pub async fn pause_upload(&self, id: &str) -> Result<(), ManagerError> {
        self.transition(id, UploadStatus::Running, UploadStatus::Paused, "paused")
            .await
    }

    pub async fn resume_upload(&self, id: &str) -> Result<(), ManagerError> {
        self.transition(id, UploadStatus::Paused, UploadStatus::Running, "resumed")
            .await
    }

    async fn transition(
        &self,
        id: &str,
        from: UploadStatus,
        to: UploadStatus,
        action: &'static str,
    ) -> Result<(), ManagerError> {
        let mut sessions = self.shared.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;

        if entry.session.status != from {
            return Err(ManagerError::InvalidState {
                id: id.to_string(),
                status: entry.session.status,
                action,
            });
        }

        match to {
            UploadStatus::Paused => entry.session.controller.pause(),
            _ => entry.session.controller.resume(),
        }
        entry.session.set_status(to);
        info!(session = %id, "upload {action}");
        Ok(())
    }

    /// Sets the global pause flag and pauses every running session.
    pub async fn pause_all_uploads(&self) {
        self.shared.globally_paused.store(true, Ordering::SeqCst);
        let mut sessions = self.shared.sessions.write().await;
        let mut count = 0;
        for entry in sessions.values_mut() {
            if entry.session.status == UploadStatus::Running {
                entry.session.controller.pause();
                entry.session.set_status(UploadStatus::Paused);
                count += 1;
            }
        }
        info!(count, "all uploads paused");
    }

    /// Clears the global pause flag and resumes every paused session.
    pub async fn resume_all_uploads(&self) {
        self.shared.globally_paused.store(false, Ordering::SeqCst);
        let mut sessions = self.shared.sessions.write().await;
        let mut count = 0;
        for entry in sessions.values_mut() {
            if entry.session.status == UploadStatus::Paused {
                entry.session.controller.resume();
                entry.session.set_status(UploadStatus::Running);
                count += 1;
            }
        }
        info!(count, "all uploads resumed");
    }

    pub fn is_globally_paused(&self) -> bool {
        self.shared.globally_paused.load(Ordering::SeqCst)
    }

    pub async fn get_upload_session(&self, id: &str) -> Result<UploadSession, ManagerError> {
        self.shared
            .sessions
            .read()
            .await
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))
    }

    pub async fn get_upload_sessions(&self) -> HashMap<String, UploadSession> {
        self.shared
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.session.clone()))
            .collect()
    }

    /// Drops a session that is not running. A paused session's suspended
    /// task is cancelled through its controller.
    pub async fn remove_upload_session(&self, id: &str) -> Result<UploadSession, ManagerError> {
        let mut sessions = self.shared.sessions.write().await;
        let status = sessions
            .get(id)
            .map(|e| e.session.status)
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;

        if status == UploadStatus::Running {
            return Err(ManagerError::InvalidState {
                id: id.to_string(),
                status,
                action: "removed",
            });
        }

        let entry = sessions
            .remove(id)
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;
        if entry.task.as_ref().is_some_and(|t| !t.is_finished()) {
            entry.session.controller.cancel();
        }
        info!(session = %id, status = %status, "upload session removed");
        Ok(entry.session)
    }

    /// Cancels a session through its controller. A queued session becomes
    /// `Cancelled` at once; a started one when its task exits.
    pub async fn cancel_upload(&self, id: &str) -> Result<(), ManagerError> {
        let mut sessions = self.shared.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;

        let status = entry.session.status;
        if status.is_terminal() {
            return Err(ManagerError::InvalidState {
                id: id.to_string(),
                status,
                action: "cancelled",
            });
        }

        entry.session.controller.cancel();
        if status == UploadStatus::Queued {
            entry.session.set_status(UploadStatus::Cancelled);
        }
        info!(session = %id, "upload cancel requested");
        Ok(())
    }

    /// Waits for a started session's task to finish and returns the final
    /// status. Returns the current status if no task is pending.
    pub async fn wait_upload(&self, id: &str) -> Result<UploadStatus, ManagerError> {
        let task = {
            let mut sessions = self.shared.sessions.write().await;
            let entry = sessions
                .get_mut(id)
                .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))?;
            entry.task.take()
        };

        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(session = %id, error = %e, "upload task did not complete");
        }

        self.get_upload_session(id).await.map(|s| s.status)
    }

    /// Aborts every running upload without removing staged chunks.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

async fn run_session(
    shared: Weak<ManagerShared>,
    session: UploadSession,
    cancel: CancellationToken,
) {
    let result = session
        .client
        .upload_file(&session.local_path, &session.remote_path, &cancel)
        .await;

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut sessions = shared.sessions.write().await;
    let Some(entry) = sessions.get_mut(&session.id) else {
        return;
    };

    let (status, error) = match result {
        Ok(_) => (UploadStatus::Completed, None),
        Err(UploadError::Cancelled) => (UploadStatus::Cancelled, None),
        Err(e) => (UploadStatus::Failed, Some(e.to_string())),
    };
    entry.session.error = error;
    entry.session.set_status(status);
    info!(session = %session.id, status = %status, "upload finished");
}
