//! Error types for the background update engine.

/// Top-level error type for the background update engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration missing, malformed, or failing validation.
    #[error("config error: {0}")]
    Config(String),

    /// Wake primitive rejected a submission, or the engine was disabled.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// Notification dispatcher or permission error.
    #[error("notification error: {0}")]
    Notification(String),

    /// Status record persistence error.
    #[error("status error: {0}")]
    Status(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
