//! User-visible update notifications.
//!
//! Delivery and the permission prompt belong to the host platform; the
//! engine talks to them through [`NotificationDispatcher`]. This module also
//! owns the wording of update notifications so every host shows the same
//! text for the same detector results.

use crate::config::{NotificationPreferences, NotificationPriority};
use crate::update::{AppUpdateInfo, LatestVersion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Notification permission state as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStatus {
    pub granted: bool,
    /// Whether asking the user again can still change the answer.
    pub can_request: bool,
    #[serde(default)]
    pub should_show_rationale: bool,
}

/// Delivers update notifications and manages notification permissions.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync + 'static {
    /// Show a notification for the given detector results.
    ///
    /// Returns `true` when a notification was actually posted.
    async fn dispatch(
        &self,
        app_update: Option<&AppUpdateInfo>,
        live_update: Option<&LatestVersion>,
    ) -> anyhow::Result<bool>;

    /// Replace the presentation preferences.
    fn set_preferences(&self, _preferences: NotificationPreferences) -> anyhow::Result<()> {
        Ok(())
    }

    async fn permission_status(&self) -> anyhow::Result<PermissionStatus>;

    /// Prompt the user for permission. Returns `true` when granted.
    async fn request_permissions(&self) -> anyhow::Result<bool>;
}

/// An action button on an update notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
}

/// Fully composed update notification, ready for a platform to post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotification {
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
    pub channel_id: Option<String>,
    pub icon_name: Option<String>,
    pub priority: NotificationPriority,
    pub sound: bool,
    pub vibration: bool,
}

impl UpdateNotification {
    /// Compose the notification for a cycle's detector results.
    ///
    /// Returns `None` when neither result reports an available update.
    #[must_use]
    pub fn compose(
        app_update: Option<&AppUpdateInfo>,
        live_update: Option<&LatestVersion>,
        preferences: &NotificationPreferences,
    ) -> Option<Self> {
        let app = app_update.filter(|a| a.update_available);
        let live = live_update.filter(|l| l.available);

        let (title, body) = match (app, live) {
            (Some(app), Some(live)) => (
                "App Update Available".to_owned(),
                format!(
                    "{} Content update {} is also ready.",
                    app_sentence(app),
                    live.version.as_deref().unwrap_or("(latest)")
                ),
            ),
            (Some(app), None) => ("App Update Available".to_owned(), app_sentence(app)),
            (None, Some(live)) => (
                "Update Available".to_owned(),
                match &live.version {
                    Some(v) => format!("Version {v} is ready to download."),
                    None => "A new version is ready to download.".to_owned(),
                },
            ),
            (None, None) => return None,
        };

        let actions = if preferences.show_actions.unwrap_or(true) {
            let labels = preferences.action_labels.clone().unwrap_or_default();
            vec![
                NotificationAction {
                    id: "update_now".to_owned(),
                    label: labels.update_now.unwrap_or_else(|| "Update Now".to_owned()),
                },
                NotificationAction {
                    id: "update_later".to_owned(),
                    label: labels.update_later.unwrap_or_else(|| "Later".to_owned()),
                },
                NotificationAction {
                    id: "dismiss".to_owned(),
                    label: labels.dismiss.unwrap_or_else(|| "Dismiss".to_owned()),
                },
            ]
        } else {
            Vec::new()
        };

        Some(Self {
            title: preferences.title.clone().unwrap_or(title),
            body: preferences.description.clone().unwrap_or(body),
            actions,
            channel_id: preferences.channel_id.clone(),
            icon_name: preferences.icon_name.clone(),
            priority: preferences.priority.unwrap_or_default(),
            sound: preferences.sound_enabled.unwrap_or(true),
            vibration: preferences.vibration_enabled.unwrap_or(true),
        })
    }
}

fn app_sentence(app: &AppUpdateInfo) -> String {
    match &app.available_version {
        Some(v) => format!("Version {v} is available (you have {}).", app.current_version),
        None => format!(
            "A newer version is available (you have {}).",
            app.current_version
        ),
    }
}

/// Dispatcher that records notifications in the log instead of posting them.
///
/// Permission starts ungranted; [`request_permissions`](NotificationDispatcher::request_permissions)
/// grants it. Until then `dispatch` reports nothing sent.
#[derive(Debug, Default)]
pub struct LogNotifier {
    preferences: Mutex<NotificationPreferences>,
    granted: AtomicBool,
}

impl LogNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier whose permission is already granted.
    #[must_use]
    pub fn granted() -> Self {
        Self {
            preferences: Mutex::new(NotificationPreferences::default()),
            granted: AtomicBool::new(true),
        }
    }

    fn current_preferences(&self) -> NotificationPreferences {
        match self.preferences.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(
        &self,
        app_update: Option<&AppUpdateInfo>,
        live_update: Option<&LatestVersion>,
    ) -> anyhow::Result<bool> {
        let preferences = self.current_preferences();
        let Some(notification) = UpdateNotification::compose(app_update, live_update, &preferences)
        else {
            return Ok(false);
        };

        if !self.granted.load(Ordering::SeqCst) {
            debug!(
                title = %notification.title,
                "notification permission not granted; not posting"
            );
            return Ok(false);
        }

        info!(
            title = %notification.title,
            body = %notification.body,
            actions = notification.actions.len(),
            "update notification"
        );
        Ok(true)
    }

    fn set_preferences(&self, preferences: NotificationPreferences) -> anyhow::Result<()> {
        match self.preferences.lock() {
            Ok(mut guard) => *guard = preferences,
            Err(poisoned) => *poisoned.into_inner() = preferences,
        }
        Ok(())
    }

    async fn permission_status(&self) -> anyhow::Result<PermissionStatus> {
        let granted = self.granted.load(Ordering::SeqCst);
        Ok(PermissionStatus {
            granted,
            can_request: !granted,
            should_show_rationale: false,
        })
    }

    async fn request_permissions(&self) -> anyhow::Result<bool> {
        self.granted.store(true, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::ActionLabels;

    #[test]
    fn compose_returns_none_without_updates() {
        let app = AppUpdateInfo::up_to_date("1.0");
        let live = LatestVersion::none();
        let composed =
            UpdateNotification::compose(Some(&app), Some(&live), &NotificationPreferences::default());
        assert!(composed.is_none());
        assert!(
            UpdateNotification::compose(None, None, &NotificationPreferences::default()).is_none()
        );
    }

    #[test]
    fn app_update_wins_title() {
        let app = AppUpdateInfo::available("1.0", "1.1");
        let live = LatestVersion::available("2024.05.1");
        let n = UpdateNotification::compose(Some(&app), Some(&live), &NotificationPreferences::default())
            .expect("notification");
        assert_eq!(n.title, "App Update Available");
        assert!(n.body.contains("1.1"));
        assert!(n.body.contains("2024.05.1"));
        assert_eq!(n.actions.len(), 3);
    }

    #[test]
    fn live_only_notification() {
        let live = LatestVersion::available("3.2.0");
        let n = UpdateNotification::compose(None, Some(&live), &NotificationPreferences::default())
            .expect("notification");
        assert_eq!(n.title, "Update Available");
        assert_eq!(n.body, "Version 3.2.0 is ready to download.");
    }

    #[test]
    fn preferences_override_text_and_actions() {
        let prefs = NotificationPreferences {
            title: Some("Fresh build".to_owned()),
            description: Some("Tap to update".to_owned()),
            action_labels: Some(ActionLabels {
                update_now: Some("Go".to_owned()),
                ..Default::default()
            }),
            priority: Some(NotificationPriority::High),
            sound_enabled: Some(false),
            ..Default::default()
        };
        let app = AppUpdateInfo::available("1.0", "1.1");
        let n = UpdateNotification::compose(Some(&app), None, &prefs).expect("notification");
        assert_eq!(n.title, "Fresh build");
        assert_eq!(n.body, "Tap to update");
        assert_eq!(n.actions[0].label, "Go");
        assert_eq!(n.actions[1].label, "Later");
        assert_eq!(n.priority, NotificationPriority::High);
        assert!(!n.sound);
        assert!(n.vibration);

        let no_actions = NotificationPreferences {
            show_actions: Some(false),
            ..Default::default()
        };
        let n = UpdateNotification::compose(Some(&app), None, &no_actions).expect("notification");
        assert!(n.actions.is_empty());
    }

    #[tokio::test]
    async fn log_notifier_requires_permission() {
        let notifier = LogNotifier::new();
        let app = AppUpdateInfo::available("1.0", "1.1");

        let status = notifier.permission_status().await.expect("status");
        assert!(!status.granted);
        assert!(status.can_request);
        assert!(!notifier.dispatch(Some(&app), None).await.expect("dispatch"));

        assert!(notifier.request_permissions().await.expect("request"));
        assert!(notifier.dispatch(Some(&app), None).await.expect("dispatch"));
        assert!(notifier.permission_status().await.expect("status").granted);
    }

    #[tokio::test]
    async fn log_notifier_sends_nothing_without_updates() {
        let notifier = LogNotifier::granted();
        let live = LatestVersion::none();
        assert!(!notifier.dispatch(None, Some(&live)).await.expect("dispatch"));
    }
}
