//! Host wake primitive.
//!
//! The engine never sleeps on its own. It asks a [`WakePrimitive`] to call
//! back at or after a point in time, and the host delivers a [`WakeEvent`]
//! carrying the execution budget it grants for that run.

use crate::error::{EngineError, Result};
use crate::scheduler::status::now_epoch_millis;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Execution budget granted to a woken cycle when the host does not say
/// otherwise.
pub const DEFAULT_WAKE_BUDGET: Duration = Duration::from_secs(30);

/// Request to be woken at or after `earliest_begin_ms` (Unix epoch ms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeRequest {
    pub task_id: String,
    pub earliest_begin_ms: u64,
}

/// Callback delivered by the host when a wake request fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeEvent {
    pub task_id: String,
    /// Time the host allows the cycle before it is expired.
    pub budget: Duration,
}

/// Facility that invokes the engine at a future time.
pub trait WakePrimitive: Send + Sync + 'static {
    /// Submit a request. A pending request with the same task id is replaced.
    fn submit(&self, request: WakeRequest) -> Result<()>;

    /// Cancel any pending request for `task_id`. Unknown ids are ignored.
    fn cancel(&self, task_id: &str);
}

/// In-process wake primitive backed by tokio timers.
///
/// Each task id owns at most one sleeping tokio task. When it fires, a
/// [`WakeEvent`] is sent on the channel returned by [`new`](Self::new).
pub struct TokioWakeScheduler {
    wake_tx: mpsc::UnboundedSender<WakeEvent>,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
    budget: Duration,
}

impl TokioWakeScheduler {
    /// Create the scheduler and the receiver its wake events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WakeEvent>) {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        (
            Self {
                wake_tx,
                pending: Mutex::new(HashMap::new()),
                budget: DEFAULT_WAKE_BUDGET,
            },
            wake_rx,
        )
    }

    /// Override the budget attached to fired wake events.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Number of requests that have not fired or been cancelled yet.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl WakePrimitive for TokioWakeScheduler {
    fn submit(&self, request: WakeRequest) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Schedule(format!("no async runtime for wake timer: {e}")))?;

        if self.wake_tx.is_closed() {
            return Err(EngineError::Schedule(
                "wake event receiver dropped".to_owned(),
            ));
        }

        let delay =
            Duration::from_millis(request.earliest_begin_ms.saturating_sub(now_epoch_millis()));
        let event = WakeEvent {
            task_id: request.task_id.clone(),
            budget: self.budget,
        };
        let wake_tx = self.wake_tx.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(task_id = %event.task_id, "wake timer fired");
            if wake_tx.send(event).is_err() {
                debug!("wake event receiver closed, dropping wake");
            }
        });

        if let Some(previous) = self.lock_pending().insert(request.task_id, handle) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, task_id: &str) {
        if let Some(handle) = self.lock_pending().remove(task_id) {
            handle.abort();
        }
    }
}

impl Drop for TokioWakeScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.lock_pending().drain() {
            handle.abort();
        }
    }
}
