//! Versioned command/response/event envelopes exchanged with the host app.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Contract version for command, response and event envelopes.
pub const CONTRACT_VERSION: u32 = 1;

/// Event name carrying a [`CycleEvent`](crate::scheduler::CycleEvent).
pub const PROGRESS_EVENT: &str = "background_update.progress";

/// Commands the host app may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "background.enable")]
    BackgroundEnable,
    #[serde(rename = "background.disable")]
    BackgroundDisable,
    #[serde(rename = "background.status")]
    BackgroundStatus,
    #[serde(rename = "background.schedule")]
    BackgroundSchedule,
    #[serde(rename = "background.trigger")]
    BackgroundTrigger,
    #[serde(rename = "notifications.set_preferences")]
    NotificationsSetPreferences,
    #[serde(rename = "notifications.get_permissions")]
    NotificationsGetPermissions,
    #[serde(rename = "notifications.request_permissions")]
    NotificationsRequestPermissions,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::BackgroundEnable => "background.enable",
            Self::BackgroundDisable => "background.disable",
            Self::BackgroundStatus => "background.status",
            Self::BackgroundSchedule => "background.schedule",
            Self::BackgroundTrigger => "background.trigger",
            Self::NotificationsSetPreferences => "notifications.set_preferences",
            Self::NotificationsGetPermissions => "notifications.get_permissions",
            Self::NotificationsRequestPermissions => "notifications.request_permissions",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "host.version" => Some(Self::HostVersion),
            "background.enable" => Some(Self::BackgroundEnable),
            "background.disable" => Some(Self::BackgroundDisable),
            "background.status" => Some(Self::BackgroundStatus),
            "background.schedule" => Some(Self::BackgroundSchedule),
            "background.trigger" => Some(Self::BackgroundTrigger),
            "notifications.set_preferences" => Some(Self::NotificationsSetPreferences),
            "notifications.get_permissions" => Some(Self::NotificationsGetPermissions),
            "notifications.request_permissions" => Some(Self::NotificationsRequestPermissions),
            _ => None,
        }
    }
}

/// Machine-readable reason attached to a failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseErrorCode {
    InvalidConfig,
    InvalidEnvelope,
    UnsupportedVersion,
    UnknownCommand,
    ScheduleFailed,
    NotificationFailed,
    Internal,
}

impl From<&EngineError> for ResponseErrorCode {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Config(_) => Self::InvalidConfig,
            EngineError::Schedule(_) => Self::ScheduleFailed,
            EngineError::Notification(_) => Self::NotificationFailed,
            EngineError::Status(_) | EngineError::Io(_) | EngineError::Channel(_) => {
                Self::Internal
            }
        }
    }
}

/// Error body of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ResponseErrorCode,
    pub message: String,
}

impl From<EngineError> for ResponseError {
    fn from(err: EngineError) -> Self {
        Self {
            code: ResponseErrorCode::from(&err),
            message: err.to_string(),
        }
    }
}

impl From<ContractError> for ResponseError {
    fn from(err: ContractError) -> Self {
        let code = match err.kind {
            ContractErrorKind::UnsupportedVersion => ResponseErrorCode::UnsupportedVersion,
            ContractErrorKind::InvalidEnvelope => ResponseErrorCode::InvalidEnvelope,
        };
        Self {
            code,
            message: err.message,
        }
    }
}

/// Response to one [`CommandEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, error: impl Into<ResponseError>) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// A command from the host app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Check the contract version and request id.
    ///
    /// # Errors
    ///
    /// Returns a [`ContractError`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != CONTRACT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, CONTRACT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// An unsolicited event pushed to the host app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: CONTRACT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Envelope that cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}
