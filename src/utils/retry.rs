//! Retry utilities: backoff builders for storage connection.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::ConnectConfig;

/// Backoff for storage connection retries at startup.
///
/// Attempts beyond the first are `max_attempts - 1` retries.
pub fn connection_backoff(config: &ConnectConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_attempts.saturating_sub(1) as usize)
        .with_jitter()
}
