//! Detector traits and the values they report.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of an app-store update lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUpdateInfo {
    pub update_available: bool,
    /// Version currently installed.
    pub current_version: String,
    /// Version offered by the store, when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_version: Option<String>,
}

impl AppUpdateInfo {
    /// Info for an app that is already on the latest version.
    #[must_use]
    pub fn up_to_date(current_version: impl Into<String>) -> Self {
        Self {
            update_available: false,
            current_version: current_version.into(),
            available_version: None,
        }
    }

    /// Info for an app with a newer version available.
    #[must_use]
    pub fn available(current_version: impl Into<String>, available: impl Into<String>) -> Self {
        Self {
            update_available: true,
            current_version: current_version.into(),
            available_version: Some(available.into()),
        }
    }
}

/// Result of a live-bundle lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestVersion {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl LatestVersion {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn available(version: impl Into<String>) -> Self {
        Self {
            available: true,
            version: Some(version.into()),
        }
    }
}

/// Reports whether a native application update is available.
#[async_trait]
pub trait AppUpdateDetector: Send + Sync + 'static {
    async fn detect_app_update(&self) -> anyhow::Result<AppUpdateInfo>;
}

/// Reports whether a live bundle update is available.
#[async_trait]
pub trait LiveUpdateDetector: Send + Sync + 'static {
    async fn detect_live_update(&self) -> anyhow::Result<LatestVersion>;
}

/// Detector that never finds anything.
///
/// Reports this crate's version as the installed app version.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

#[async_trait]
impl AppUpdateDetector for NoopDetector {
    async fn detect_app_update(&self) -> anyhow::Result<AppUpdateInfo> {
        Ok(AppUpdateInfo::up_to_date(env!("CARGO_PKG_VERSION")))
    }
}

#[async_trait]
impl LiveUpdateDetector for NoopDetector {
    async fn detect_live_update(&self) -> anyhow::Result<LatestVersion> {
        Ok(LatestVersion::none())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn app_update_info_wire_format() {
        let info = AppUpdateInfo::available("1.0", "1.1");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "updateAvailable": true,
                "currentVersion": "1.0",
                "availableVersion": "1.1"
            })
        );

        let up_to_date = serde_json::to_value(AppUpdateInfo::up_to_date("1.0")).unwrap();
        assert!(up_to_date.get("availableVersion").is_none());
    }

    #[test]
    fn latest_version_omits_missing_version() {
        let json = serde_json::to_value(LatestVersion::none()).unwrap();
        assert_eq!(json, serde_json::json!({"available": false}));
    }

    #[tokio::test]
    async fn noop_detector_reports_nothing() {
        let app = NoopDetector.detect_app_update().await.expect("app");
        assert!(!app.update_available);
        assert_eq!(app.current_version, env!("CARGO_PKG_VERSION"));

        let live = NoopDetector.detect_live_update().await.expect("live");
        assert!(!live.available);
    }
}
