use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use harbor_core::{SessionStatus, StatusMessage};
use tokio::task::JoinHandle;

/// How long the `Updated` flash stays visible before reverting to `Ready`.
const UPDATED_REVERT_DELAY: Duration = Duration::from_secs(2);

struct StatusInner {
    status: Mutex<SessionStatus>,
    revert_task: Mutex<Option<JoinHandle<()>>>,
}

/// Partial status update; unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub is_ready: bool,
    pub preview_url: Option<String>,
}

/// Single authoritative holder of the session status.
///
/// The coordinator is the only writer; everything else takes snapshots
/// through `status`. Clones share the same underlying state.
#[derive(Clone)]
pub struct DevSessionStatusManager {
    inner: Arc<StatusInner>,
}

impl Default for DevSessionStatusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DevSessionStatusManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatusInner {
                status: Mutex::new(SessionStatus::default()),
                revert_task: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.status).clone()
    }

    /// Store a new message.
    ///
    /// Any pending `Updated -> Ready` reversion is cancelled first, so a
    /// stale timer can never clobber newer state. Setting `Updated`
    /// schedules a fresh reversion; the scheduled task re-checks that the
    /// message is still `Updated` before reverting.
    pub fn set_message(&self, message: StatusMessage) {
        self.cancel_revert();
        lock(&self.inner.status).message = message;
        if message == StatusMessage::Updated {
            self.schedule_revert();
        }
    }

    /// Merge `is_ready` / `preview_url` into the status. A created session
    /// is never uncreated, so `is_ready` only ever flips to true.
    pub fn update_status(&self, update: StatusUpdate) {
        let mut status = lock(&self.inner.status);
        if update.is_ready {
            status.is_ready = true;
        }
        if let Some(url) = update.preview_url {
            status.preview_url = Some(url);
        }
    }

    fn schedule_revert(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(UPDATED_REVERT_DELAY).await;
            let mut status = lock(&inner.status);
            if status.message == StatusMessage::Updated {
                status.message = StatusMessage::Ready;
            }
        });
        if let Some(previous) = lock(&self.inner.revert_task).replace(handle) {
            previous.abort();
        }
    }

    fn cancel_revert(&self) {
        if let Some(handle) = lock(&self.inner.revert_task).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
