//! Native update: background update checks for mobile and desktop hosts.
//!
//! The engine periodically asks two detectors whether an app-store update or
//! a live bundle update is available, notifies the user when one is, and
//! keeps a status record the host app can query.
//!
//! # Architecture
//!
//! - **Config**: typed, validated [`BackgroundUpdateConfig`]
//! - **Scheduler**: [`BackgroundUpdater`] runs check cycles on host wakes,
//!   gated by device constraints and retried after failures
//! - **Collaborators**: detectors, notification dispatcher, device state and
//!   wake primitive are injected traits
//! - **Host**: JSON envelopes over stdin/stdout for the native shell

pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod notifications;
pub mod paths;
pub mod scheduler;
pub mod update;

pub use config::{BackgroundUpdateConfig, NotificationPreferences, UpdateType};
pub use error::{EngineError, Result};
pub use scheduler::{BackgroundUpdateStatus, BackgroundUpdater, CheckResult};
