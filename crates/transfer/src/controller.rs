//! Pause/resume/cancel control for a single upload.

use std::sync::{PoisonError, RwLock, Weak};

use tokio::sync::{Mutex, mpsc};

use crate::ids::new_standalone_session_id;
use crate::manager::ManagerShared;
use crate::types::UploadState;

/// Tri-state switch polled by the chunk loop and flipped by callers.
///
/// The state field is authoritative. Every transition also pushes a
/// wake-up into a single-slot channel with a non-blocking send: a paused
/// engine waiting on it wakes up and re-reads the state, and if nobody is
/// waiting (or a wake-up is already pending) the signal is dropped.
#[derive(Debug)]
pub struct SessionController {
    session_id: String,
    state: RwLock<UploadState>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<mpsc::Receiver<()>>,
    manager: Option<Weak<ManagerShared>>,
}

impl SessionController {
    /// Creates a running controller for `session_id` with no owning manager.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::build(session_id.into(), None)
    }

    /// Creates a running controller with a generated `session-<nanos>` id.
    pub fn standalone() -> Self {
        Self::build(new_standalone_session_id(), None)
    }

    pub(crate) fn managed(session_id: String, manager: Weak<ManagerShared>) -> Self {
        Self::build(session_id, Some(manager))
    }

    fn build(session_id: String, manager: Option<Weak<ManagerShared>>) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        Self {
            session_id,
            state: RwLock::new(UploadState::Running),
            wake_tx,
            wake_rx: Mutex::new(wake_rx),
            manager,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns `true` while the manager that created this controller is alive.
    pub fn is_managed(&self) -> bool {
        self.manager
            .as_ref()
            .is_some_and(|m| m.strong_count() > 0)
    }

    pub fn state(&self) -> UploadState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Running -> Paused. No-op in any other state.
    pub fn pause(&self) {
        self.transition(UploadState::Running, UploadState::Paused);
    }

    /// Paused -> Running. No-op in any other state.
    pub fn resume(&self) {
        self.transition(UploadState::Paused, UploadState::Running);
    }

    /// Moves to Cancelled from any state. Terminal.
    pub fn cancel(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = UploadState::Cancelled;
        self.signal();
    }

    fn transition(&self, from: UploadState, to: UploadState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            self.signal();
        }
    }

    fn signal(&self) {
        // Full slot means a wake-up is already pending.
        let _ = self.wake_tx.try_send(());
    }

    /// Waits for the next transition signal. Callers must re-read
    /// [`state`](Self::state) afterwards.
    pub(crate) async fn wait_for_signal(&self) {
        let mut rx = self.wake_rx.lock().await;
        // The sender lives in `self`, so `recv` only returns `Some`.
        let _ = rx.recv().await;
    }
}
