//! Engine status record and its single-writer tracker.
//!
//! [`StatusTracker`] owns the only mutable [`BackgroundUpdateStatus`]. Every
//! change goes through one of its transition methods, each of which applies
//! under one lock, so concurrent callers observe a single total order.
//! Readers only ever get cloned snapshots.
//!
//! When a state path is configured the record is written after every
//! transition and the lifetime counters survive a process restart. Writes
//! happen outside the record lock, in transition order, so snapshot readers
//! never wait on disk I/O.

use crate::config::BackgroundUpdateConfig;
use crate::error::{EngineError, Result};
use crate::scheduler::result::UpdateError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Observable state of the background update engine.
///
/// Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackgroundUpdateStatus {
    pub enabled: bool,
    pub is_running: bool,
    /// Cycles started, including manual triggers. Never decreases.
    pub check_count: u64,
    /// Cycles that ended in failure. Never decreases and is not reset by a
    /// successful cycle.
    pub failure_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_check_time: Option<u64>,
    /// Last time a cycle found an update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<UpdateError>,
}

/// On-disk form of the status record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedStatus {
    #[serde(default = "default_state_version")]
    version: u8,
    #[serde(default)]
    status: BackgroundUpdateStatus,
}

fn default_state_version() -> u8 {
    1
}

/// Owner of the engine status record.
#[derive(Debug, Default)]
pub struct StatusTracker {
    status: Mutex<BackgroundUpdateStatus>,
    state_path: Option<PathBuf>,
    /// Serializes transitions with their disk writes.
    writer: Mutex<()>,
}

impl StatusTracker {
    /// Create an in-memory tracker with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker persisted at `path`, restoring any earlier record.
    ///
    /// A restored record always comes back disabled, idle and unscheduled:
    /// the configuration and any wake request did not survive the restart.
    /// A missing or unreadable file starts from zero.
    #[must_use]
    pub fn with_state_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let status = match load_status_from_path(&path) {
            Ok(Some(mut restored)) => {
                restored.enabled = false;
                restored.is_running = false;
                restored.next_check_time = None;
                restored.current_task_id = None;
                debug!(
                    path = %path.display(),
                    check_count = restored.check_count,
                    failure_count = restored.failure_count,
                    "restored background update status"
                );
                restored
            }
            Ok(None) => BackgroundUpdateStatus::default(),
            Err(e) => {
                warn!("cannot load background update status: {e}");
                BackgroundUpdateStatus::default()
            }
        };

        Self {
            status: Mutex::new(status),
            state_path: Some(path),
            writer: Mutex::new(()),
        }
    }

    /// Immutable copy of the current record.
    #[must_use]
    pub fn snapshot(&self) -> BackgroundUpdateStatus {
        self.lock().clone()
    }

    /// Record a new activation.
    pub fn activate(&self, config: &BackgroundUpdateConfig) {
        self.transition(|s| {
            s.enabled = config.enabled;
        });
    }

    /// Return to the disabled state. Counters are kept.
    pub fn deactivate(&self) {
        self.transition(|s| {
            s.enabled = false;
            s.is_running = false;
            s.current_task_id = None;
            s.next_check_time = None;
        });
    }

    /// Mark a cycle as started.
    pub fn begin_cycle(&self) {
        let now = now_epoch_millis();
        self.transition(|s| {
            s.is_running = true;
            s.check_count = s.check_count.saturating_add(1);
            s.last_check_time = Some(now);
        });
    }

    /// Mark the running cycle as completed without error.
    pub fn end_cycle_success(&self, updates_found: bool) {
        let now = now_epoch_millis();
        self.transition(|s| {
            s.is_running = false;
            s.last_error = None;
            if updates_found {
                s.last_update_time = Some(now);
            }
        });
    }

    /// Mark the running cycle as failed. Returns the new failure count.
    pub fn end_cycle_failure(&self, error: UpdateError) -> u64 {
        self.transition(|s| {
            s.is_running = false;
            s.failure_count = s.failure_count.saturating_add(1);
            s.last_error = Some(error);
            s.failure_count
        })
    }

    /// Record a cycle that expired before it could start, leaving any cycle
    /// in flight marked as running. Returns the new failure count.
    pub fn record_expired_cycle(&self, error: UpdateError) -> u64 {
        let now = now_epoch_millis();
        self.transition(|s| {
            s.check_count = s.check_count.saturating_add(1);
            s.last_check_time = Some(now);
            s.failure_count = s.failure_count.saturating_add(1);
            s.last_error = Some(error);
            s.failure_count
        })
    }

    /// Record a submitted wake request.
    pub fn record_schedule(&self, next_check_time: u64, task_id: impl Into<String>) {
        let task_id = task_id.into();
        self.transition(|s| {
            s.next_check_time = Some(next_check_time);
            s.current_task_id = Some(task_id);
        });
    }

    /// Forget any wake request (cancelled, fired, or rejected by the host).
    pub fn clear_schedule(&self) {
        self.transition(|s| {
            s.next_check_time = None;
            s.current_task_id = None;
        });
    }

    fn transition<T>(&self, apply: impl FnOnce(&mut BackgroundUpdateStatus) -> T) -> T {
        let Some(path) = &self.state_path else {
            return apply(&mut self.lock());
        };

        let _writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (out, record) = {
            let mut guard = self.lock();
            let out = apply(&mut guard);
            (out, guard.clone())
        };
        if let Err(e) = save_status_to_path(path, &record) {
            error!("cannot persist background update status: {e}");
        }
        out
    }

    fn lock(&self) -> MutexGuard<'_, BackgroundUpdateStatus> {
        // A panic mid-transition cannot leave a half-applied record behind:
        // each transition only assigns plain fields.
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn load_status_from_path(path: &Path) -> Result<Option<BackgroundUpdateStatus>> {
    let bytes = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EngineError::Status(format!("cannot read status: {e}"))),
    };

    let state: PersistedStatus = serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Status(format!("cannot parse status: {e}")))?;
    Ok(Some(state.status))
}

fn save_status_to_path(path: &Path, status: &BackgroundUpdateStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EngineError::Status(format!("cannot create status dir: {e}")))?;
    }

    let state = PersistedStatus {
        version: default_state_version(),
        status: status.clone(),
    };
    let json = serde_json::to_string_pretty(&state)
        .map_err(|e| EngineError::Status(format!("cannot serialize status: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| EngineError::Status(format!("cannot write status: {e}")))?;
    Ok(())
}

/// Returns current Unix epoch milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::UpdateType;
    use crate::scheduler::result::ErrorCode;
    use std::sync::Arc;

    #[test]
    fn new_tracker_starts_at_zero() {
        let status = StatusTracker::new().snapshot();
        assert_eq!(status, BackgroundUpdateStatus::default());
        assert!(!status.enabled);
        assert_eq!(status.check_count, 0);
        assert_eq!(status.failure_count, 0);
    }

    #[test]
    fn cycle_success_clears_error_and_keeps_failures() {
        let tracker = StatusTracker::new();
        tracker.begin_cycle();
        let failures = tracker.end_cycle_failure(UpdateError::new(ErrorCode::DetectorFault, "x"));
        assert_eq!(failures, 1);
        assert!(tracker.snapshot().last_error.is_some());

        tracker.begin_cycle();
        assert!(tracker.snapshot().is_running);
        tracker.end_cycle_success(false);

        let status = tracker.snapshot();
        assert!(!status.is_running);
        assert_eq!(status.check_count, 2);
        assert_eq!(status.failure_count, 1);
        assert!(status.last_error.is_none());
        assert!(status.last_update_time.is_none());
        assert!(status.last_check_time.is_some());
    }

    #[test]
    fn update_time_only_set_when_found() {
        let tracker = StatusTracker::new();
        tracker.begin_cycle();
        tracker.end_cycle_success(true);
        assert!(tracker.snapshot().last_update_time.is_some());
    }

    #[test]
    fn deactivate_clears_schedule_but_keeps_counters() {
        let tracker = StatusTracker::new();
        tracker.activate(&BackgroundUpdateConfig::new(1000, vec![UpdateType::Both]));
        tracker.record_schedule(42, "task");
        tracker.begin_cycle();
        tracker.deactivate();

        let status = tracker.snapshot();
        assert!(!status.enabled);
        assert!(!status.is_running);
        assert!(status.current_task_id.is_none());
        assert!(status.next_check_time.is_none());
        assert_eq!(status.check_count, 1);
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let tracker = StatusTracker::new();
        let mut copy = tracker.snapshot();
        copy.check_count = 99;
        assert_eq!(tracker.snapshot().check_count, 0);
    }

    #[test]
    fn concurrent_cycles_count_exactly() {
        let tracker = Arc::new(StatusTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.begin_cycle();
                        t.end_cycle_failure(UpdateError::new(ErrorCode::UnknownError, "x"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let status = tracker.snapshot();
        assert_eq!(status.check_count, 800);
        assert_eq!(status.failure_count, 800);
    }

    #[test]
    fn snapshot_wire_format_omits_unset_fields() {
        let json = serde_json::to_value(StatusTracker::new().snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "enabled": false,
                "isRunning": false,
                "checkCount": 0,
                "failureCount": 0
            })
        );
    }

    #[test]
    fn persisted_status_restores_counters_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status.json");

        {
            let tracker = StatusTracker::with_state_path(&path);
            tracker.activate(&BackgroundUpdateConfig::new(1000, vec![UpdateType::Both]));
            tracker.record_schedule(123, "task");
            tracker.begin_cycle();
            tracker.end_cycle_failure(UpdateError::new(ErrorCode::DetectorFault, "offline"));
            tracker.begin_cycle();
        }

        let restored = StatusTracker::with_state_path(&path).snapshot();
        assert_eq!(restored.check_count, 2);
        assert_eq!(restored.failure_count, 1);
        assert!(!restored.enabled);
        assert!(!restored.is_running);
        assert!(restored.next_check_time.is_none());
        assert!(restored.current_task_id.is_none());
        assert_eq!(
            restored.last_error.map(|e| e.message),
            Some("offline".to_owned())
        );
    }

    #[test]
    fn expired_queued_cycle_keeps_running_cycle_marked() {
        let tracker = StatusTracker::new();
        tracker.begin_cycle();
        let failures =
            tracker.record_expired_cycle(UpdateError::new(ErrorCode::TaskExpired, "expired"));

        let status = tracker.snapshot();
        assert_eq!(failures, 1);
        assert!(status.is_running);
        assert_eq!(status.check_count, 2);
        assert_eq!(status.failure_count, 1);
    }

    #[test]
    fn persisted_record_matches_last_concurrent_transition() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status.json");
        let tracker = Arc::new(StatusTracker::with_state_path(&path));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        t.begin_cycle();
                        t.end_cycle_success(false);
                    }
                })
            })
            .collect();
        let reader = {
            let t = Arc::clone(&tracker);
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..200 {
                    let count = t.snapshot().check_count;
                    assert!(count >= last, "check count went backwards");
                    last = count;
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        let on_disk = load_status_from_path(&path).unwrap().expect("record");
        assert_eq!(on_disk, tracker.snapshot());
        assert_eq!(on_disk.check_count, 100);
    }

    #[test]
    fn corrupt_state_file_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status.json");
        std::fs::write(&path, "{not json").unwrap();

        let tracker = StatusTracker::with_state_path(&path);
        assert_eq!(tracker.snapshot().check_count, 0);
        tracker.begin_cycle();
        assert_eq!(StatusTracker::with_state_path(&path).snapshot().check_count, 1);
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_epoch_millis() > 1_577_836_800_000);
    }
}
