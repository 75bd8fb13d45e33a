//! Device-condition gate for background checks.
//!
//! A check may only run when the device satisfies every constraint the
//! config asks for. Signals the host could not determine count as not
//! satisfied, so an unknown state skips the cycle instead of running it.

use crate::config::BackgroundUpdateConfig;
use crate::device::{DeviceState, NetworkType};

/// Outcome of evaluating the constraints for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintVerdict {
    Allowed,
    /// The device has no connectivity.
    Offline,
    /// `requireWifi` is set and the device is not on Wi-Fi.
    WifiRequired,
    /// The connection is (or may be) metered and metered use is not allowed.
    MeteredConnection,
    /// The battery is below the configured minimum, or its level is unknown.
    LowBattery,
}

impl ConstraintVerdict {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }

    /// Short reason used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Offline => "offline",
            Self::WifiRequired => "wifi_required",
            Self::MeteredConnection => "metered_connection",
            Self::LowBattery => "low_battery",
        }
    }
}

impl std::fmt::Display for ConstraintVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluate the constraints, returning the first one that is violated.
#[must_use]
pub fn evaluate(config: &BackgroundUpdateConfig, state: &DeviceState) -> ConstraintVerdict {
    if state.network == Some(NetworkType::Offline) {
        return ConstraintVerdict::Offline;
    }

    if config.require_wifi && state.network != Some(NetworkType::Wifi) {
        return ConstraintVerdict::WifiRequired;
    }

    if !config.allow_metered_connection
        && matches!(state.network, None | Some(NetworkType::Metered))
    {
        return ConstraintVerdict::MeteredConnection;
    }

    if config.respect_battery_optimization {
        match state.battery_level {
            Some(level) if level >= config.minimum_battery_level => {}
            _ => return ConstraintVerdict::LowBattery,
        }
    }

    ConstraintVerdict::Allowed
}

/// Returns `true` if a check may run under the given device state.
#[must_use]
pub fn allowed(config: &BackgroundUpdateConfig, state: &DeviceState) -> bool {
    evaluate(config, state).is_allowed()
}
