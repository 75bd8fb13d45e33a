//! Background check scheduling.
//!
//! Decides whether a check may run now, runs it, records the outcome and
//! asks the host to wake the engine again.

pub mod constraints;
pub mod controller;
pub mod executor;
pub mod result;
pub mod retry;
pub mod runner;
pub mod status;
pub mod wake;

pub use constraints::ConstraintVerdict;
pub use controller::ScheduleController;
pub use executor::{ActiveConfig, CheckExecutor, Collaborators, CyclePhase};
pub use result::{CheckResult, CycleEvent, CycleEventKind, CycleEventStatus, ErrorCode, UpdateError};
pub use runner::BackgroundUpdater;
pub use status::{BackgroundUpdateStatus, StatusTracker};
pub use wake::{DEFAULT_WAKE_BUDGET, TokioWakeScheduler, WakeEvent, WakePrimitive, WakeRequest};
