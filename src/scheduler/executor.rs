//! One background check cycle.
//!
//! A cycle moves `Idle -> Evaluating -> (Skipped | Running) -> Completed`.
//! Cycles are serialized by a gate: a cycle that arrives while another is in
//! flight waits for it to finish, so the status counters only ever see one
//! cycle at a time.
//!
//! The host may expire a cycle at any suspension point by cancelling the
//! token passed to [`CheckExecutor::run`], including while it still waits
//! for the gate. The cycle then records a failure and reschedules instead of
//! leaving the status half-updated. A started cycle whose future is dropped
//! is folded into a failure the same way.

use crate::config::BackgroundUpdateConfig;
use crate::device::{DeviceState, DeviceStateProvider};
use crate::notifications::NotificationDispatcher;
use crate::scheduler::constraints;
use crate::scheduler::controller::ScheduleController;
use crate::scheduler::result::{CheckResult, CycleEvent, ErrorCode, UpdateError};
use crate::scheduler::status::StatusTracker;
use crate::update::{AppUpdateDetector, AppUpdateInfo, LatestVersion, LiveUpdateDetector};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 32;

/// External collaborators a cycle consults.
#[derive(Clone)]
pub struct Collaborators {
    pub app_detector: Arc<dyn AppUpdateDetector>,
    pub live_detector: Arc<dyn LiveUpdateDetector>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub device: Arc<dyn DeviceStateProvider>,
}

/// The configuration of the current activation, if any.
///
/// Cleared on disable. A cycle reads it at entry and again before
/// rescheduling, so a disable that lands mid-cycle is observed.
#[derive(Debug, Default)]
pub struct ActiveConfig {
    slot: RwLock<Option<BackgroundUpdateConfig>>,
}

impl ActiveConfig {
    #[must_use]
    pub fn get(&self) -> Option<BackgroundUpdateConfig> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Config of an enabled activation.
    #[must_use]
    pub fn enabled(&self) -> Option<BackgroundUpdateConfig> {
        self.get().filter(|c| c.enabled)
    }

    pub fn set(&self, config: Option<BackgroundUpdateConfig>) {
        match self.slot.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Evaluating,
    Skipped,
    Running,
    Completed,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Evaluating => "evaluating",
            Self::Skipped => "skipped",
            Self::Running => "running",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// How the next wake should be computed after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextWake {
    Interval,
    Retry { failure_count: u64 },
}

/// Runs check cycles against the injected collaborators.
pub struct CheckExecutor {
    collaborators: Collaborators,
    active: Arc<ActiveConfig>,
    status: Arc<StatusTracker>,
    controller: Arc<ScheduleController>,
    gate: tokio::sync::Mutex<()>,
    phase: Mutex<CyclePhase>,
    events_tx: broadcast::Sender<CycleEvent>,
}

impl CheckExecutor {
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        active: Arc<ActiveConfig>,
        status: Arc<StatusTracker>,
        controller: Arc<ScheduleController>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            collaborators,
            active,
            status,
            controller,
            gate: tokio::sync::Mutex::new(()),
            phase: Mutex::new(CyclePhase::Idle),
            events_tx,
        }
    }

    /// Subscribe to the progress event emitted after every cycle that
    /// passed the entry guard.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CycleEvent> {
        self.events_tx.subscribe()
    }

    /// Phase of the cycle in flight, or [`CyclePhase::Idle`].
    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        match self.phase.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Run one cycle, waiting for any cycle already in flight.
    ///
    /// Never fails: every fault is folded into the returned [`CheckResult`].
    /// A cycle that expires while still queued is recorded as a failed cycle
    /// without disturbing the one in flight.
    pub async fn run(&self, expired: &CancellationToken) -> CheckResult {
        let _gate = tokio::select! {
            biased;
            gate = self.gate.lock() => gate,
            _ = expired.cancelled() => return self.expire_queued(),
        };

        let Some(config) = self.active.enabled() else {
            debug!("check requested while background updates are disabled");
            return disabled_result();
        };

        let mut cycle = CycleGuard::new(self);
        let result = self.run_enabled(&config, expired, &mut cycle).await;
        cycle.finish();
        self.publish(&result);
        result
    }

    async fn run_enabled(
        &self,
        config: &BackgroundUpdateConfig,
        expired: &CancellationToken,
        cycle: &mut CycleGuard<'_>,
    ) -> CheckResult {
        self.set_phase(CyclePhase::Evaluating);
        let device = tokio::select! {
            biased;
            _ = expired.cancelled() => {
                self.status.begin_cycle();
                return self.fail(expired_error());
            }
            state = self.collaborators.device.current() => state.unwrap_or_else(|e| {
                warn!(error = %e, "device state unavailable, treating constraints as unmet");
                DeviceState::default()
            }),
        };

        let verdict = constraints::evaluate(config, &device);
        if !verdict.is_allowed() {
            self.set_phase(CyclePhase::Skipped);
            info!(reason = %verdict, "background check skipped by device constraints");
            self.reschedule(NextWake::Interval);
            self.set_phase(CyclePhase::Completed);
            return CheckResult::skipped();
        }

        self.set_phase(CyclePhase::Running);
        self.status.begin_cycle();
        cycle.started = true;

        let detection = async {
            tokio::try_join!(
                self.detect_app(config.checks_app_updates()),
                self.detect_live(config.checks_live_updates()),
            )
        };
        let (app_update, live_update) = tokio::select! {
            biased;
            _ = expired.cancelled() => return self.fail(expired_error()),
            detected = detection => match detected {
                Ok(found) => found,
                Err(error) => return self.fail(error),
            },
        };

        let updates_found = app_update.as_ref().is_some_and(|a| a.update_available)
            || live_update.as_ref().is_some_and(|l| l.available);

        let notification_sent = if updates_found {
            tokio::select! {
                biased;
                _ = expired.cancelled() => return self.fail(expired_error()),
                sent = self.notify(app_update.as_ref(), live_update.as_ref()) => sent,
            }
        } else {
            false
        };

        self.status.end_cycle_success(updates_found);
        self.set_phase(CyclePhase::Completed);
        info!(updates_found, notification_sent, "background check completed");
        self.reschedule(NextWake::Interval);

        CheckResult {
            success: true,
            updates_found,
            app_update,
            live_update,
            notification_sent,
            error: None,
        }
    }

    async fn detect_app(&self, wanted: bool) -> Result<Option<AppUpdateInfo>, UpdateError> {
        if !wanted {
            return Ok(None);
        }
        let detector = Arc::clone(&self.collaborators.app_detector);
        match AssertUnwindSafe(detector.detect_app_update())
            .catch_unwind()
            .await
        {
            Ok(Ok(info)) => Ok(Some(info)),
            Ok(Err(e)) => Err(UpdateError::new(ErrorCode::DetectorFault, e.to_string())),
            Err(panic) => Err(UpdateError::new(
                ErrorCode::UnknownError,
                format!("app update detector panicked: {}", panic_message(panic.as_ref())),
            )),
        }
    }

    async fn detect_live(&self, wanted: bool) -> Result<Option<LatestVersion>, UpdateError> {
        if !wanted {
            return Ok(None);
        }
        let detector = Arc::clone(&self.collaborators.live_detector);
        match AssertUnwindSafe(detector.detect_live_update())
            .catch_unwind()
            .await
        {
            Ok(Ok(latest)) => Ok(Some(latest)),
            Ok(Err(e)) => Err(UpdateError::new(ErrorCode::DetectorFault, e.to_string())),
            Err(panic) => Err(UpdateError::new(
                ErrorCode::UnknownError,
                format!("live update detector panicked: {}", panic_message(panic.as_ref())),
            )),
        }
    }

    /// Best-effort notification. Faults only mean "not sent".
    async fn notify(
        &self,
        app_update: Option<&AppUpdateInfo>,
        live_update: Option<&LatestVersion>,
    ) -> bool {
        let dispatch = self.collaborators.notifier.dispatch(app_update, live_update);
        match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(Ok(sent)) => sent,
            Ok(Err(e)) => {
                warn!(error = %e, "update notification failed");
                false
            }
            Err(panic) => {
                warn!(
                    "update notification panicked: {}",
                    panic_message(panic.as_ref())
                );
                false
            }
        }
    }

    /// Fold a cycle that expired before it got the gate into a failure.
    fn expire_queued(&self) -> CheckResult {
        if self.active.enabled().is_none() {
            return disabled_result();
        }
        let error = expired_error();
        warn!(code = %error.code, "background check expired while queued behind a running cycle");
        let failure_count = self.status.record_expired_cycle(error.clone());
        self.reschedule(NextWake::Retry { failure_count });
        let result = CheckResult::failed(error);
        self.publish(&result);
        result
    }

    fn publish(&self, result: &CheckResult) {
        // No subscribers is fine.
        let _ = self.events_tx.send(result.to_event());
    }

    fn fail(&self, error: UpdateError) -> CheckResult {
        warn!(code = %error.code, message = %error.message, "background check failed");
        let failure_count = self.status.end_cycle_failure(error.clone());
        self.set_phase(CyclePhase::Completed);
        self.reschedule(NextWake::Retry { failure_count });
        CheckResult::failed(error)
    }

    fn reschedule(&self, next: NextWake) {
        let Some(config) = self.active.enabled() else {
            debug!("background updates disabled during check, not rescheduling");
            return;
        };
        // The controller logs rejected submissions; the engine stays enabled
        // and unscheduled until the next trigger or reconfiguration.
        let _ = match next {
            NextWake::Interval => self.controller.schedule(&config),
            NextWake::Retry { failure_count } => {
                self.controller.schedule_retry(&config, failure_count)
            }
        };
    }

    fn set_phase(&self, phase: CyclePhase) {
        debug!(%phase, "check cycle phase");
        match self.phase.lock() {
            Ok(mut guard) => *guard = phase,
            Err(poisoned) => *poisoned.into_inner() = phase,
        }
    }
}

/// Resets the phase when a cycle ends, and fails a started cycle whose
/// future was dropped before it finished.
struct CycleGuard<'a> {
    executor: &'a CheckExecutor,
    started: bool,
    finished: bool,
}

impl<'a> CycleGuard<'a> {
    fn new(executor: &'a CheckExecutor) -> Self {
        Self {
            executor,
            started: false,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.finished && self.started {
            self.executor.fail(UpdateError::new(
                ErrorCode::TaskExpired,
                "background check was abandoned before it completed",
            ));
        }
        self.executor.set_phase(CyclePhase::Idle);
    }
}

fn disabled_result() -> CheckResult {
    CheckResult::failed(UpdateError::invalid_config("Background updates not enabled"))
}

fn expired_error() -> UpdateError {
    UpdateError::new(
        ErrorCode::TaskExpired,
        "background task expired before the check completed",
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
