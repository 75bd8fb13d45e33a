//! Next-wake computation and wake request bookkeeping.

use crate::config::BackgroundUpdateConfig;
use crate::error::{EngineError, Result};
use crate::scheduler::retry;
use crate::scheduler::status::{StatusTracker, now_epoch_millis};
use crate::scheduler::wake::{WakePrimitive, WakeRequest};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Submits and cancels wake requests and records them in the status.
///
/// At most one request is outstanding: every submission cancels the
/// previous one first, so rescheduling never double-fires.
///
/// Submissions are refused until [`arm`](Self::arm) is called and again
/// after [`disarm`](Self::disarm). The armed flag shares a lock with the
/// outstanding request, so a disarm is never followed by a stray submission.
pub struct ScheduleController {
    wake: Arc<dyn WakePrimitive>,
    status: Arc<StatusTracker>,
    slot: Mutex<WakeSlot>,
}

#[derive(Debug, Default)]
struct WakeSlot {
    armed: bool,
    outstanding: Option<String>,
}

impl ScheduleController {
    #[must_use]
    pub fn new(wake: Arc<dyn WakePrimitive>, status: Arc<StatusTracker>) -> Self {
        Self {
            wake,
            status,
            slot: Mutex::new(WakeSlot::default()),
        }
    }

    /// Allow submissions.
    pub fn arm(&self) {
        self.lock_slot().armed = true;
    }

    /// Refuse further submissions and cancel the outstanding request.
    pub fn disarm(&self) {
        let mut slot = self.lock_slot();
        slot.armed = false;
        self.cancel_locked(&mut slot);
    }

    /// Schedule the next check one regular interval from now.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Schedule`] if the controller is disarmed, or if
    /// the wake primitive rejects the request. The status is then left with
    /// no scheduled wake.
    pub fn schedule(&self, config: &BackgroundUpdateConfig) -> Result<String> {
        self.schedule_in(config, config.check_interval())
    }

    /// Schedule the next check after a failed cycle.
    ///
    /// Uses the retry delay while `failure_count` is within `max_retries`,
    /// otherwise the regular interval.
    ///
    /// # Errors
    ///
    /// Same as [`schedule`](Self::schedule).
    pub fn schedule_retry(
        &self,
        config: &BackgroundUpdateConfig,
        failure_count: u64,
    ) -> Result<String> {
        match retry::next_delay(failure_count, config) {
            Some(delay) => {
                debug!(
                    failure_count,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                self.schedule_in(config, delay)
            }
            None => {
                debug!(
                    failure_count,
                    max_retries = config.max_retries,
                    "retries exhausted, using regular interval"
                );
                self.schedule(config)
            }
        }
    }

    /// Schedule the next check `delay` from now under the config's task id.
    ///
    /// # Errors
    ///
    /// Same as [`schedule`](Self::schedule).
    pub fn schedule_in(&self, config: &BackgroundUpdateConfig, delay: Duration) -> Result<String> {
        let task_id = config.task_identifier().to_owned();
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let next_check_time = now_epoch_millis().saturating_add(delay_ms);

        let mut slot = self.lock_slot();
        if !slot.armed {
            debug!(task_id = %task_id, "background updates disabled, not scheduling");
            return Err(EngineError::Schedule(
                "background updates are disabled".to_owned(),
            ));
        }
        if let Some(previous) = slot.outstanding.take() {
            self.wake.cancel(&previous);
        }

        let request = WakeRequest {
            task_id: task_id.clone(),
            earliest_begin_ms: next_check_time,
        };
        match self.wake.submit(request) {
            Ok(()) => {
                slot.outstanding = Some(task_id.clone());
                self.status.record_schedule(next_check_time, task_id.clone());
                info!(task_id = %task_id, delay_ms, "background check scheduled");
                Ok(task_id)
            }
            Err(e) => {
                self.status.clear_schedule();
                warn!(task_id = %task_id, error = %e, "failed to schedule background check");
                Err(e)
            }
        }
    }

    /// Forget the outstanding request after the host delivered it.
    pub fn mark_fired(&self, task_id: &str) {
        let mut slot = self.lock_slot();
        if slot.outstanding.as_deref() == Some(task_id) {
            slot.outstanding = None;
        }
    }

    /// Task id of the outstanding wake request.
    #[must_use]
    pub fn outstanding(&self) -> Option<String> {
        self.lock_slot().outstanding.clone()
    }

    fn cancel_locked(&self, slot: &mut WakeSlot) {
        if let Some(task_id) = slot.outstanding.take() {
            self.wake.cancel(&task_id);
            debug!(task_id = %task_id, "background check cancelled");
        }
        self.status.clear_schedule();
    }

    fn lock_slot(&self) -> MutexGuard<'_, WakeSlot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::UpdateType;

    #[derive(Default)]
    struct RecordingWake {
        submitted: Mutex<Vec<WakeRequest>>,
        cancelled: Mutex<Vec<String>>,
        reject: bool,
    }

    impl WakePrimitive for RecordingWake {
        fn submit(&self, request: WakeRequest) -> Result<()> {
            if self.reject {
                return Err(EngineError::Schedule("rejected".to_owned()));
            }
            self.submitted.lock().unwrap().push(request);
            Ok(())
        }

        fn cancel(&self, task_id: &str) {
            self.cancelled.lock().unwrap().push(task_id.to_owned());
        }
    }

    fn setup(reject: bool) -> (Arc<RecordingWake>, Arc<StatusTracker>, ScheduleController) {
        let wake = Arc::new(RecordingWake {
            reject,
            ..Default::default()
        });
        let status = Arc::new(StatusTracker::new());
        let controller = ScheduleController::new(wake.clone(), Arc::clone(&status));
        controller.arm();
        (wake, status, controller)
    }

    fn config() -> BackgroundUpdateConfig {
        BackgroundUpdateConfig::new(3_600_000, vec![UpdateType::Both])
    }

    #[test]
    fn schedule_uses_interval_and_records_status() {
        let (wake, status, controller) = setup(false);
        let before = now_epoch_millis();
        let task_id = controller.schedule(&config()).expect("schedule");
        let after = now_epoch_millis();

        assert_eq!(task_id, crate::config::DEFAULT_TASK_IDENTIFIER);
        let submitted = wake.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        let at = submitted[0].earliest_begin_ms;
        assert!(at >= before + 3_600_000 && at <= after + 3_600_000);

        let snapshot = status.snapshot();
        assert_eq!(snapshot.next_check_time, Some(at));
        assert_eq!(snapshot.current_task_id.as_deref(), Some(task_id.as_str()));
    }

    #[test]
    fn reschedule_cancels_previous_request() {
        let (wake, _status, controller) = setup(false);
        controller.schedule(&config()).expect("first");
        controller.schedule(&config()).expect("second");

        assert_eq!(wake.submitted.lock().unwrap().len(), 2);
        assert_eq!(
            wake.cancelled.lock().unwrap().as_slice(),
            &[crate::config::DEFAULT_TASK_IDENTIFIER.to_owned()]
        );
    }

    #[test]
    fn retry_uses_retry_delay_within_budget() {
        let (wake, _status, controller) = setup(false);
        let before = now_epoch_millis();
        controller.schedule_retry(&config(), 1).expect("retry");
        let at = wake.submitted.lock().unwrap()[0].earliest_begin_ms;
        assert!(at >= before + 5_000 && at < before + 60_000);
    }

    #[test]
    fn retry_falls_back_to_interval_when_exhausted() {
        let (wake, _status, controller) = setup(false);
        let before = now_epoch_millis();
        controller.schedule_retry(&config(), 4).expect("retry");
        let at = wake.submitted.lock().unwrap()[0].earliest_begin_ms;
        assert!(at >= before + 3_600_000);
    }

    #[test]
    fn rejected_submission_leaves_engine_unscheduled() {
        let (_wake, status, controller) = setup(true);
        status.record_schedule(1, "stale");
        let err = controller.schedule(&config()).unwrap_err();
        assert!(matches!(err, EngineError::Schedule(_)));

        let snapshot = status.snapshot();
        assert!(snapshot.next_check_time.is_none());
        assert!(snapshot.current_task_id.is_none());
        assert!(controller.outstanding().is_none());
    }

    #[test]
    fn disarm_cancels_outstanding_request() {
        let (wake, status, controller) = setup(false);
        let mut custom = config();
        custom.task_identifier = Some("custom.task".to_owned());
        controller.schedule(&custom).expect("schedule");
        controller.disarm();

        assert_eq!(
            wake.cancelled.lock().unwrap().as_slice(),
            &["custom.task".to_owned()]
        );
        assert!(status.snapshot().current_task_id.is_none());
        assert!(controller.outstanding().is_none());

        // Nothing outstanding: a second disarm does not reach the primitive.
        controller.disarm();
        assert_eq!(wake.cancelled.lock().unwrap().len(), 1);
    }

    #[test]
    fn reconfigured_task_id_cancels_old_request() {
        let (wake, _status, controller) = setup(false);
        controller.schedule(&config()).expect("schedule");
        let mut renamed = config();
        renamed.task_identifier = Some("renamed".to_owned());
        controller.schedule(&renamed).expect("schedule renamed");

        assert_eq!(
            wake.cancelled.lock().unwrap().as_slice(),
            &[crate::config::DEFAULT_TASK_IDENTIFIER.to_owned()]
        );
        assert_eq!(controller.outstanding().as_deref(), Some("renamed"));
    }

    #[test]
    fn disarmed_controller_refuses_to_schedule() {
        let (wake, status, controller) = setup(false);
        controller.schedule(&config()).expect("schedule");
        controller.disarm();

        let err = controller.schedule_retry(&config(), 1).unwrap_err();
        assert!(matches!(err, EngineError::Schedule(_)));
        assert_eq!(wake.submitted.lock().unwrap().len(), 1);
        assert_eq!(wake.cancelled.lock().unwrap().len(), 1);
        let snapshot = status.snapshot();
        assert!(snapshot.next_check_time.is_none());
        assert!(snapshot.current_task_id.is_none());

        controller.arm();
        controller.schedule(&config()).expect("rearmed");
        assert_eq!(wake.submitted.lock().unwrap().len(), 2);
    }

    #[test]
    fn disarm_racing_reschedules_never_leaves_a_wake() {
        let (wake, status, controller) = setup(false);
        let controller = Arc::new(controller);
        let schedulers: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&controller);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let _ = c.schedule(&config());
                    }
                })
            })
            .collect();
        std::thread::sleep(std::time::Duration::from_millis(1));
        controller.disarm();
        for s in schedulers {
            s.join().unwrap();
        }

        assert!(controller.outstanding().is_none());
        assert!(status.snapshot().current_task_id.is_none());
        let submitted = wake.submitted.lock().unwrap().len();
        let cancelled = wake.cancelled.lock().unwrap().len();
        assert_eq!(submitted, cancelled, "every submission was cancelled");
    }

    #[test]
    fn mark_fired_only_clears_matching_id() {
        let (_wake, _status, controller) = setup(false);
        controller.schedule(&config()).expect("schedule");
        controller.mark_fired("other");
        assert!(controller.outstanding().is_some());
        controller.mark_fired(crate::config::DEFAULT_TASK_IDENTIFIER);
        assert!(controller.outstanding().is_none());
    }
}
