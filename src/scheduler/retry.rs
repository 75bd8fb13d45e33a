//! Retry backoff after failed checks.

use crate::config::BackgroundUpdateConfig;
use std::time::Duration;

/// Delay before the next check after a failure.
///
/// `failure_count` is the lifetime failure counter from the status record.
/// While it is within `max_retries` the flat `retry_delay` applies; past
/// that, `None` tells the caller to fall back to the regular interval.
#[must_use]
pub fn next_delay(failure_count: u64, config: &BackgroundUpdateConfig) -> Option<Duration> {
    if failure_count > u64::from(config.max_retries) {
        return None;
    }
    Some(config.retry_delay())
}

/// Delay until the next check after a failure, falling back to the regular
/// interval once retries are exhausted.
#[must_use]
pub fn delay_after_failure(failure_count: u64, config: &BackgroundUpdateConfig) -> Duration {
    next_delay(failure_count, config).unwrap_or_else(|| config.check_interval())
}
