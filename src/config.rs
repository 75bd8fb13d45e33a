//! Configuration types for background update checks.
//!
//! The host hands the engine an untyped JSON (or TOML) object. It is parsed
//! here into a [`BackgroundUpdateConfig`] with explicit defaults and then
//! validated, so everything past this boundary works with a config that is
//! known to be usable.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Task identifier used when the config does not override it.
pub const DEFAULT_TASK_IDENTIFIER: &str = "com.capacitor.native.update.background";

/// Kind of update a background check looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Native application (store) update.
    AppUpdate,
    /// Live (web bundle) update.
    LiveUpdate,
    /// Both kinds.
    Both,
}

impl UpdateType {
    /// Render to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppUpdate => "app_update",
            Self::LiveUpdate => "live_update",
            Self::Both => "both",
        }
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance hint forwarded to the platform notification channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Min,
    Low,
    #[default]
    Default,
    High,
    Max,
}

/// Button labels for actionable update notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLabels {
    pub update_now: Option<String>,
    pub update_later: Option<String>,
    pub dismiss: Option<String>,
}

/// How update notifications should look and behave.
///
/// The scheduling core never reads these; they are passed through to the
/// notification dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationPreferences {
    /// Title override for the notification.
    pub title: Option<String>,
    /// Body override for the notification.
    pub description: Option<String>,
    /// Platform icon resource name.
    pub icon_name: Option<String>,
    pub sound_enabled: Option<bool>,
    pub vibration_enabled: Option<bool>,
    /// Whether to attach update/later/dismiss actions.
    pub show_actions: Option<bool>,
    pub action_labels: Option<ActionLabels>,
    /// Android notification channel identifier.
    pub channel_id: Option<String>,
    /// Android notification channel display name.
    pub channel_name: Option<String>,
    pub priority: Option<NotificationPriority>,
}

impl NotificationPreferences {
    /// Parse preferences from a JSON object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Config(format!("invalid notification preferences: {e}")))
    }
}

/// Background update configuration, immutable for the lifetime of one
/// activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundUpdateConfig {
    /// Whether background checks should run at all.
    pub enabled: bool,
    /// Interval between scheduled checks in milliseconds.
    #[serde(rename = "checkInterval")]
    pub check_interval_ms: u64,
    /// Which detectors to consult on each cycle.
    pub update_types: Vec<UpdateType>,
    /// Install found updates without asking. Carried for the host; the engine
    /// never installs anything.
    #[serde(default)]
    pub auto_install: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_preferences: Option<NotificationPreferences>,
    /// Skip checks when the battery is below `minimum_battery_level`.
    #[serde(default = "default_true")]
    pub respect_battery_optimization: bool,
    /// Allow checks on metered (cellular) networks.
    #[serde(default)]
    pub allow_metered_connection: bool,
    /// Battery percentage (0-100) below which checks are skipped.
    #[serde(default = "default_minimum_battery_level")]
    pub minimum_battery_level: u8,
    /// Only check while on Wi-Fi.
    #[serde(default)]
    pub require_wifi: bool,
    /// Failures after which retry backoff stops and the normal interval resumes.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before retrying a failed check, in milliseconds.
    #[serde(rename = "retryDelay", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Override for the wake request identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_identifier: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_minimum_battery_level() -> u8 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

impl BackgroundUpdateConfig {
    /// Create an enabled config with the given interval and update types and
    /// default values for everything else.
    #[must_use]
    pub fn new(check_interval_ms: u64, update_types: Vec<UpdateType>) -> Self {
        Self {
            enabled: true,
            check_interval_ms,
            update_types,
            auto_install: false,
            notification_preferences: None,
            respect_battery_optimization: default_true(),
            allow_metered_connection: false,
            minimum_battery_level: default_minimum_battery_level(),
            require_wifi: false,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            task_identifier: None,
        }
    }

    /// Parse and validate a config from an untyped JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when required fields are missing, a
    /// field has the wrong type or an unknown value, or validation fails.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(EngineError::Config(
                "configuration must be an object".to_owned(),
            ));
        }
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] on parse or validation failure.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| EngineError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants every other component relies on.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_ms == 0 {
            return Err(EngineError::Config(
                "checkInterval must be greater than zero".to_owned(),
            ));
        }
        if self.update_types.is_empty() {
            return Err(EngineError::Config(
                "updateTypes must not be empty".to_owned(),
            ));
        }
        if self.minimum_battery_level > 100 {
            return Err(EngineError::Config(format!(
                "minimumBatteryLevel must be between 0 and 100, got {}",
                self.minimum_battery_level
            )));
        }
        if self
            .task_identifier
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err(EngineError::Config(
                "taskIdentifier cannot be blank".to_owned(),
            ));
        }
        Ok(())
    }

    /// Interval between scheduled checks.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Delay before retrying after a failed check.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Identifier under which wake requests are submitted.
    #[must_use]
    pub fn task_identifier(&self) -> &str {
        self.task_identifier
            .as_deref()
            .unwrap_or(DEFAULT_TASK_IDENTIFIER)
    }

    /// Returns `true` if the app-update detector should run.
    #[must_use]
    pub fn checks_app_updates(&self) -> bool {
        self.update_types
            .iter()
            .any(|t| matches!(t, UpdateType::AppUpdate | UpdateType::Both))
    }

    /// Returns `true` if the live-update detector should run.
    #[must_use]
    pub fn checks_live_updates(&self) -> bool {
        self.update_types
            .iter()
            .any(|t| matches!(t, UpdateType::LiveUpdate | UpdateType::Both))
    }
}
