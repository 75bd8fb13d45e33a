//! Host command channel and router.
//!
//! [`HostCommandClient`] hands envelopes to a [`HostCommandServer`] over an
//! mpsc channel and awaits the response on a oneshot. The server routes each
//! command to an [`UpdateCommandHandler`] and republishes the handler's cycle
//! events as [`EventEnvelope`]s.
//!
//! Commands are taken in arrival order. Those answered from engine state run
//! inline; those that wait on a cycle or the notifier run on their own task,
//! so `background.status` and `background.disable` still get through while a
//! triggered check is in flight.

use crate::config::{BackgroundUpdateConfig, NotificationPreferences};
use crate::error::{EngineError, Result};
use crate::host::contract::{
    CONTRACT_VERSION, CommandEnvelope, CommandName, EventEnvelope, PROGRESS_EVENT,
    ResponseEnvelope,
};
use crate::notifications::PermissionStatus;
use crate::scheduler::{BackgroundUpdateStatus, BackgroundUpdater, CheckResult, CycleEvent};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Operations the host command surface exposes.
#[async_trait]
pub trait UpdateCommandHandler: Send + Sync + 'static {
    fn enable(&self, config: BackgroundUpdateConfig) -> Result<()>;
    fn disable(&self);
    fn status(&self) -> BackgroundUpdateStatus;
    fn schedule_check(&self, interval_ms: u64) -> Result<String>;
    async fn trigger_check(&self) -> CheckResult;
    fn set_notification_preferences(&self, preferences: NotificationPreferences) -> Result<()>;
    async fn notification_permissions(&self) -> Result<PermissionStatus>;
    async fn request_notification_permissions(&self) -> Result<bool>;
    fn subscribe_events(&self) -> broadcast::Receiver<CycleEvent>;
}

#[async_trait]
impl UpdateCommandHandler for BackgroundUpdater {
    fn enable(&self, config: BackgroundUpdateConfig) -> Result<()> {
        BackgroundUpdater::enable(self, config)
    }

    fn disable(&self) {
        BackgroundUpdater::disable(self);
    }

    fn status(&self) -> BackgroundUpdateStatus {
        BackgroundUpdater::status(self)
    }

    fn schedule_check(&self, interval_ms: u64) -> Result<String> {
        BackgroundUpdater::schedule_check(self, interval_ms)
    }

    async fn trigger_check(&self) -> CheckResult {
        BackgroundUpdater::trigger_check(self).await
    }

    fn set_notification_preferences(&self, preferences: NotificationPreferences) -> Result<()> {
        BackgroundUpdater::set_notification_preferences(self, preferences)
    }

    async fn notification_permissions(&self) -> Result<PermissionStatus> {
        BackgroundUpdater::notification_permissions(self).await
    }

    async fn request_notification_permissions(&self) -> Result<bool> {
        BackgroundUpdater::request_notification_permissions(self).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<CycleEvent> {
        BackgroundUpdater::subscribe_events(self)
    }
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    /// Send one command and wait for its response.
    ///
    /// Envelopes that fail validation are answered locally with an error
    /// response and never reach the server.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the server is gone.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        self.submit(envelope).await?.response().await
    }

    /// Queue one command and return a future for its response.
    ///
    /// Commands are queued in call order, so a caller can pipeline several
    /// before awaiting any response.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the server is gone.
    pub async fn submit(&self, envelope: CommandEnvelope) -> Result<PendingResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        if let Err(e) = envelope.validate() {
            debug!(request_id = %envelope.request_id, error = %e, "rejecting command envelope");
            let _ = response_tx.send(ResponseEnvelope::error(envelope.request_id, e));
            return Ok(PendingResponse(response_rx));
        }

        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| EngineError::Channel(format!("failed to send host command: {e}")))?;
        Ok(PendingResponse(response_rx))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

/// Response to a command queued with [`HostCommandClient::submit`].
pub struct PendingResponse(oneshot::Receiver<ResponseEnvelope>);

impl PendingResponse {
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the server dropped the command.
    pub async fn response(self) -> Result<ResponseEnvelope> {
        self.0
            .await
            .map_err(|e| EngineError::Channel(format!("host command response dropped: {e}")))
    }
}

pub struct HostCommandServer<H: UpdateCommandHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    handler: Arc<H>,
}

#[must_use]
pub fn command_channel<H: UpdateCommandHandler>(
    request_capacity: usize,
    event_capacity: usize,
    handler: Arc<H>,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            handler,
        },
    )
}

impl<H: UpdateCommandHandler> HostCommandServer<H> {
    /// Serve commands until every client is dropped.
    pub async fn run(mut self) {
        let forwarder = tokio::spawn(forward_cycle_events(
            self.handler.subscribe_events(),
            self.event_tx.clone(),
        ));

        while let Some(request) = self.request_rx.recv().await {
            if waits_on_engine(request.envelope.command) {
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    let response = route(handler.as_ref(), &request.envelope).await;
                    let _ = request.response_tx.send(response);
                });
            } else {
                let response = route(self.handler.as_ref(), &request.envelope).await;
                let _ = request.response_tx.send(response);
            }
        }

        forwarder.abort();
    }
}

/// Commands that may wait on a running cycle or on the notifier.
fn waits_on_engine(command: CommandName) -> bool {
    matches!(
        command,
        CommandName::BackgroundTrigger
            | CommandName::NotificationsGetPermissions
            | CommandName::NotificationsRequestPermissions
    )
}

/// Route a command envelope to the handler.
///
/// Handler errors become error responses; this never fails.
async fn route<H: UpdateCommandHandler>(handler: &H, envelope: &CommandEnvelope) -> ResponseEnvelope {
    debug!(
        request_id = %envelope.request_id,
        command = envelope.command.as_str(),
        "routing host command"
    );
    match dispatch(handler, envelope).await {
        Ok(payload) => ResponseEnvelope::ok(envelope.request_id.clone(), payload),
        Err(e) => {
            warn!(
                request_id = %envelope.request_id,
                command = envelope.command.as_str(),
                error = %e,
                "host command failed"
            );
            ResponseEnvelope::error(envelope.request_id.clone(), e)
        }
    }
}

async fn dispatch<H: UpdateCommandHandler>(
    handler: &H,
    envelope: &CommandEnvelope,
) -> Result<serde_json::Value> {
    match envelope.command {
        CommandName::HostPing => Ok(serde_json::json!({"pong": true})),
        CommandName::HostVersion => Ok(serde_json::json!({
            "contract_version": CONTRACT_VERSION,
            "engine_version": env!("CARGO_PKG_VERSION"),
        })),
        CommandName::BackgroundEnable => {
            let config = BackgroundUpdateConfig::from_json(&envelope.payload)?;
            handler.enable(config)?;
            Ok(serde_json::json!({"enabled": handler.status().enabled}))
        }
        CommandName::BackgroundDisable => {
            handler.disable();
            Ok(serde_json::json!({"enabled": false}))
        }
        CommandName::BackgroundStatus => to_payload(&handler.status()),
        CommandName::BackgroundSchedule => {
            let interval_ms = parse_interval(&envelope.payload)?;
            let task_id = handler.schedule_check(interval_ms)?;
            Ok(serde_json::json!({"taskId": task_id}))
        }
        CommandName::BackgroundTrigger => to_payload(&handler.trigger_check().await),
        CommandName::NotificationsSetPreferences => {
            let preferences = NotificationPreferences::from_json(&envelope.payload)?;
            handler.set_notification_preferences(preferences)?;
            Ok(serde_json::json!({"accepted": true}))
        }
        CommandName::NotificationsGetPermissions => {
            to_payload(&handler.notification_permissions().await?)
        }
        CommandName::NotificationsRequestPermissions => {
            let granted = handler.request_notification_permissions().await?;
            Ok(serde_json::json!({"granted": granted}))
        }
    }
}

async fn forward_cycle_events(
    mut cycle_rx: broadcast::Receiver<CycleEvent>,
    event_tx: broadcast::Sender<EventEnvelope>,
) {
    loop {
        match cycle_rx.recv().await {
            Ok(event) => match serde_json::to_value(event) {
                Ok(payload) => {
                    let envelope = EventEnvelope::new(
                        uuid::Uuid::new_v4().to_string(),
                        PROGRESS_EVENT,
                        payload,
                    );
                    // No subscribers is fine.
                    let _ = event_tx.send(envelope);
                }
                Err(e) => warn!(error = %e, "cannot encode cycle event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(lagged = n, "cycle event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Channel(format!("cannot encode response payload: {e}")))
}

fn parse_interval(payload: &serde_json::Value) -> Result<u64> {
    payload
        .get("interval")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            EngineError::Config(
                "background.schedule requires a non-negative integer `interval` in ms".to_owned(),
            )
        })
}
