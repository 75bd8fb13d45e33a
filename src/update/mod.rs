//! Update detection collaborators.
//!
//! The engine does not know how an app-store update or a live bundle is
//! found. It is handed one [`AppUpdateDetector`] and one
//! [`LiveUpdateDetector`] at construction and only consumes their answers.

pub mod detector;

pub use detector::{AppUpdateDetector, AppUpdateInfo, LatestVersion, LiveUpdateDetector, NoopDetector};
