//! Per-cycle outcome types.

use crate::update::{AppUpdateInfo, LatestVersion};
use serde::{Deserialize, Serialize};

/// Machine-readable error category reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Engine disabled, unconfigured, or handed an unusable config.
    InvalidConfig,
    /// A detector reported a fault.
    DetectorFault,
    /// The host's execution budget ran out before the cycle finished.
    TaskExpired,
    /// Anything else that went wrong during a cycle.
    UnknownError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::DetectorFault => "DETECTOR_FAULT",
            Self::TaskExpired => "TASK_EXPIRED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed cycle and to the status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateError {
    pub code: ErrorCode,
    pub message: String,
}

impl UpdateError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for UpdateError {}

/// Result of one check cycle. Always a value, never a raised fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    /// The cycle ran to completion without an internal fault.
    pub success: bool,
    pub updates_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_update: Option<AppUpdateInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_update: Option<LatestVersion>,
    pub notification_sent: bool,
    /// Present iff `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UpdateError>,
}

impl CheckResult {
    /// A failed cycle.
    #[must_use]
    pub fn failed(error: UpdateError) -> Self {
        Self {
            success: false,
            updates_found: false,
            app_update: None,
            live_update: None,
            notification_sent: false,
            error: Some(error),
        }
    }

    /// A cycle skipped because device constraints were not met.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            success: true,
            updates_found: false,
            app_update: None,
            live_update: None,
            notification_sent: false,
            error: None,
        }
    }

    /// Build the progress event emitted for this result.
    #[must_use]
    pub fn to_event(&self) -> CycleEvent {
        CycleEvent {
            kind: if self.app_update.is_some() {
                CycleEventKind::AppUpdate
            } else {
                CycleEventKind::LiveUpdate
            },
            status: if self.success {
                CycleEventStatus::Completed
            } else {
                CycleEventStatus::Failed
            },
            percent: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleEventKind {
    AppUpdate,
    LiveUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleEventStatus {
    Completed,
    Failed,
}

/// Coarse progress event, emitted once per completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleEvent {
    #[serde(rename = "type")]
    pub kind: CycleEventKind,
    pub status: CycleEventStatus,
    pub percent: u8,
}
