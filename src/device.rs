//! Device conditions consulted before each background check.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of network connection the device is currently on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Wi-Fi (treated as unmetered).
    Wifi,
    /// Metered connection such as cellular data.
    Metered,
    /// Other unmetered connection (ethernet, USB tethering to a host).
    Unmetered,
    /// No connectivity.
    Offline,
}

/// Snapshot of the device signals the constraint check needs.
///
/// `None` means the host could not determine the signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    /// Battery charge percentage (0-100).
    pub battery_level: Option<u8>,
    pub network: Option<NetworkType>,
}

impl DeviceState {
    #[must_use]
    pub fn new(battery_level: u8, network: NetworkType) -> Self {
        Self {
            battery_level: Some(battery_level.min(100)),
            network: Some(network),
        }
    }
}

/// Source of current device conditions, queried once per check cycle.
#[async_trait]
pub trait DeviceStateProvider: Send + Sync + 'static {
    async fn current(&self) -> anyhow::Result<DeviceState>;
}

/// Provider that always reports the same state.
///
/// Used by headless hosts where battery and network are not observable.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticDeviceState(pub DeviceState);

#[async_trait]
impl DeviceStateProvider for StaticDeviceState {
    async fn current(&self) -> anyhow::Result<DeviceState> {
        Ok(self.0)
    }
}
