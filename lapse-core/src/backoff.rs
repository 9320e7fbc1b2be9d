//! Retry backoff
//!
//! Delay before a failed job becomes claimable again: `retry_interval`
//! multiplied by `retry_factor` once per previous failure, capped at
//! `max_retry_interval`.

use std::time::Duration;

use crate::config::SchedulerConfig;

/// Computes the retry delay after attempt `attempt` failed
///
/// # Arguments
/// * `config` - Clamped scheduler configuration
/// * `attempt` - The attempt that just failed, starting at 1
///
/// Returns `min(r * f^(attempt - 1), l)`. Attempt 0 is treated like attempt 1.
pub fn retry_delay(config: &SchedulerConfig, attempt: u32) -> Duration {
    let base = config.retry_interval;
    let limit = config.max_retry_interval.max(base);
    let factor = config.retry_factor;

    if attempt <= 1 || factor.is_nan() || factor <= 1.0 || base.is_zero() {
        return base.min(limit);
    }

    // Past this exponent the product exceeds the limit anyway
    let ceiling = (limit.as_secs_f64() / base.as_secs_f64()).ln() / factor.ln();
    let exponent = f64::from(attempt - 1);
    if exponent >= ceiling.ceil() {
        return limit;
    }

    let scaled = base.as_secs_f64() * factor.powf(exponent);
    Duration::try_from_secs_f64(scaled).map_or(limit, |delay| delay.min(limit))
}
