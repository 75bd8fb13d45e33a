//! Background updater façade.
//!
//! [`BackgroundUpdater`] is the command surface the host talks to. It owns
//! the active configuration, the status tracker, the schedule controller and
//! the check executor, and runs the loop that turns host wakes into cycles.

use crate::config::{BackgroundUpdateConfig, NotificationPreferences};
use crate::error::{EngineError, Result};
use crate::notifications::{NotificationDispatcher, PermissionStatus};
use crate::scheduler::controller::ScheduleController;
use crate::scheduler::executor::{ActiveConfig, CheckExecutor, Collaborators};
use crate::scheduler::result::{CheckResult, CycleEvent};
use crate::scheduler::status::{BackgroundUpdateStatus, StatusTracker};
use crate::scheduler::wake::{DEFAULT_WAKE_BUDGET, WakeEvent, WakePrimitive};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The background update engine.
pub struct BackgroundUpdater {
    active: Arc<ActiveConfig>,
    status: Arc<StatusTracker>,
    controller: Arc<ScheduleController>,
    executor: CheckExecutor,
    notifier: Arc<dyn NotificationDispatcher>,
    manual_budget: Duration,
}

impl BackgroundUpdater {
    /// Build an engine around its collaborators.
    ///
    /// `status` is taken from the caller so a persisted tracker
    /// ([`StatusTracker::with_state_path`]) can be plugged in.
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        wake: Arc<dyn WakePrimitive>,
        status: Arc<StatusTracker>,
    ) -> Self {
        let active = Arc::new(ActiveConfig::default());
        let controller = Arc::new(ScheduleController::new(wake, Arc::clone(&status)));
        let notifier = Arc::clone(&collaborators.notifier);
        let executor = CheckExecutor::new(
            collaborators,
            Arc::clone(&active),
            Arc::clone(&status),
            Arc::clone(&controller),
        );
        Self {
            active,
            status,
            controller,
            executor,
            notifier,
            manual_budget: DEFAULT_WAKE_BUDGET,
        }
    }

    /// Time a manual check may run before it is expired.
    #[must_use]
    pub fn with_manual_budget(mut self, budget: Duration) -> Self {
        self.manual_budget = budget;
        self
    }

    /// Activate background checks with `config` and schedule the first wake.
    ///
    /// A config with `enabled == false` disables the engine. A wake
    /// submission the host rejects is logged; the engine then stays enabled
    /// without a scheduled wake.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` fails validation. Nothing
    /// changes in that case.
    pub fn enable(&self, config: BackgroundUpdateConfig) -> Result<()> {
        config.validate()?;

        if !config.enabled {
            self.disable();
            return Ok(());
        }

        if let Some(preferences) = config.notification_preferences.clone() {
            if let Err(e) = self.notifier.set_preferences(preferences) {
                warn!(error = %e, "notification preferences not applied");
            }
        }

        self.active.set(Some(config.clone()));
        self.status.activate(&config);
        self.controller.arm();
        info!(
            interval_ms = config.check_interval_ms,
            update_types = ?config.update_types,
            task_id = %config.task_identifier(),
            "background updates enabled"
        );

        if self.controller.schedule(&config).is_err() {
            debug!("engine enabled without a scheduled wake");
        }
        Ok(())
    }

    /// Deactivate background checks and cancel the outstanding wake.
    ///
    /// A cycle already in flight runs to completion but does not reschedule.
    pub fn disable(&self) {
        self.active.set(None);
        self.controller.disarm();
        self.status.deactivate();
        info!("background updates disabled");
    }

    /// Snapshot of the engine status.
    #[must_use]
    pub fn status(&self) -> BackgroundUpdateStatus {
        self.status.snapshot()
    }

    /// Config of the current activation, if enabled.
    #[must_use]
    pub fn active_config(&self) -> Option<BackgroundUpdateConfig> {
        self.active.enabled()
    }

    /// Schedule a one-off check `interval_ms` from now.
    ///
    /// Replaces the outstanding wake. Later cycles go back to the configured
    /// interval.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for a zero interval or when the engine
    /// is not enabled, and [`EngineError::Schedule`] if the host rejects the
    /// wake request.
    pub fn schedule_check(&self, interval_ms: u64) -> Result<String> {
        if interval_ms == 0 {
            return Err(EngineError::Config(
                "interval must be greater than zero".to_owned(),
            ));
        }
        let Some(config) = self.active.enabled() else {
            return Err(EngineError::Config(
                "Background updates not enabled".to_owned(),
            ));
        };
        self.controller
            .schedule_in(&config, Duration::from_millis(interval_ms))
    }

    /// Run one cycle now, regardless of the schedule.
    ///
    /// Waits for a cycle already in flight. The wait and the cycle together
    /// are expired after the manual budget.
    pub async fn trigger_check(&self) -> CheckResult {
        debug!("manual background check requested");
        self.run_with_budget(self.manual_budget).await
    }

    /// Run the cycle for a host wake, expiring it once the wake's budget
    /// has elapsed.
    ///
    /// Returns `None` when the wake is ignored: the engine is disabled or
    /// the wake belongs to a task id that is no longer active.
    pub async fn handle_wake(&self, event: WakeEvent) -> Option<CheckResult> {
        let Some(config) = self.active.enabled() else {
            debug!(task_id = %event.task_id, "ignoring wake while disabled");
            return None;
        };
        if config.task_identifier() != event.task_id {
            debug!(
                task_id = %event.task_id,
                active = %config.task_identifier(),
                "ignoring wake for inactive task id"
            );
            return None;
        }
        self.controller.mark_fired(&event.task_id);
        Some(self.run_with_budget(event.budget).await)
    }

    async fn run_with_budget(&self, budget: Duration) -> CheckResult {
        let expired = CancellationToken::new();
        let finished = CancellationToken::new();
        // Stops the timer when the cycle returns or is dropped.
        let _stop_timer = finished.clone().drop_guard();
        {
            let expired = expired.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = finished.cancelled() => {}
                    _ = tokio::time::sleep(budget) => expired.cancel(),
                }
            });
        }

        self.executor.run(&expired).await
    }

    /// Start the loop that runs a cycle for every wake delivered on
    /// `wake_rx`, until `shutdown` is cancelled or the sender is dropped.
    pub fn run(
        self: Arc<Self>,
        mut wake_rx: mpsc::UnboundedReceiver<WakeEvent>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("background update wake loop started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = wake_rx.recv() => match event {
                        Some(event) => {
                            if let Some(result) = self.handle_wake(event).await {
                                debug!(
                                    success = result.success,
                                    updates_found = result.updates_found,
                                    "scheduled background check finished"
                                );
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("background update wake loop stopped");
        })
    }

    /// Subscribe to per-cycle progress events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CycleEvent> {
        self.executor.subscribe_events()
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Notification`] if the dispatcher rejects them.
    pub fn set_notification_preferences(&self, preferences: NotificationPreferences) -> Result<()> {
        self.notifier
            .set_preferences(preferences)
            .map_err(|e| EngineError::Notification(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Notification`] if the dispatcher faults.
    pub async fn notification_permissions(&self) -> Result<PermissionStatus> {
        self.notifier
            .permission_status()
            .await
            .map_err(|e| EngineError::Notification(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Notification`] if the dispatcher faults.
    pub async fn request_notification_permissions(&self) -> Result<bool> {
        self.notifier
            .request_permissions()
            .await
            .map_err(|e| EngineError::Notification(e.to_string()))
    }
}
