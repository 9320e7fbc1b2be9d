//! Scheduler configuration
//!
//! Defines every tunable of a scheduler instance: worker count, polling,
//! lease keep-alive, retry backoff and pruning. Raw values supplied by callers
//! go through [`SchedulerConfig::clamped`] before any loop sees them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Floor for the poll and lease-retry intervals
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for the worker pool of one scheduler instance
pub const MAX_WORKER_COUNT: usize = 1024;

/// Scheduler configuration
///
/// Durations (de)serialize as integer milliseconds, so a config file can say
/// `poll_interval = 15000`. Missing fields fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent pollers; zero yields a schedule-only instance
    pub worker_count: usize,

    /// Sleep between claims when no job was due
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Pause between successful lease renewals
    #[serde(with = "duration_ms")]
    pub keep_alive_interval: Duration,

    /// Length of a lease, measured from the claim or the last renewal
    #[serde(with = "duration_ms")]
    pub keep_alive_period: Duration,

    /// Pause before renewing again after a failed renewal
    #[serde(with = "duration_ms")]
    pub keep_alive_retry_interval: Duration,

    /// Delay before the first retry
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,

    /// Growth factor applied per failed attempt
    pub retry_factor: f64,

    /// Attempts after which a failing job is forgotten
    pub retry_limit: u32,

    /// Cap for the computed retry delay
    #[serde(with = "duration_ms")]
    pub max_retry_interval: Duration,

    /// Pause between prunes once the backlog is cleared
    #[serde(with = "duration_ms")]
    pub prune_interval: Duration,

    /// How long terminal jobs are retained before pruning
    #[serde(with = "duration_ms")]
    pub keep_finished: Duration,
}

impl SchedulerConfig {
    /// Creates a configuration with the documented defaults
    pub fn new() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(5),
            keep_alive_period: MINUTE,
            keep_alive_retry_interval: SECOND,
            retry_interval: Duration::from_secs(30),
            retry_factor: 1.5,
            retry_limit: 10,
            max_retry_interval: 6 * HOUR,
            prune_interval: HOUR,
            keep_finished: 90 * DAY,
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration, period: Duration, retry: Duration) -> Self {
        self.keep_alive_interval = interval;
        self.keep_alive_period = period;
        self.keep_alive_retry_interval = retry;
        self
    }

    pub fn with_retry(mut self, interval: Duration, factor: f64, limit: u32, max: Duration) -> Self {
        self.retry_interval = interval;
        self.retry_factor = factor;
        self.retry_limit = limit;
        self.max_retry_interval = max;
        self
    }

    pub fn with_pruning(mut self, interval: Duration, keep_finished: Duration) -> Self {
        self.prune_interval = interval;
        self.keep_finished = keep_finished;
        self
    }

    /// Returns a copy with every field forced into its safe range
    ///
    /// Total over all inputs: zero durations, huge durations and non-finite
    /// factors all map to usable values, and clamping twice changes nothing.
    pub fn clamped(&self) -> Self {
        let keep_alive_interval = self.keep_alive_interval.max(SECOND);
        let keep_alive_period = self
            .keep_alive_period
            .max(MINUTE)
            .max(keep_alive_interval.saturating_mul(3));
        let keep_alive_retry_interval = self
            .keep_alive_retry_interval
            .max(MIN_INTERVAL)
            .min(keep_alive_interval)
            .min(keep_alive_period.mul_f64(0.3));

        let retry_interval = self.retry_interval.clamp(SECOND, DAY);
        let retry_factor = if self.retry_factor.is_nan() {
            1.0
        } else {
            self.retry_factor.clamp(1.0, 10.0)
        };

        Self {
            worker_count: self.worker_count.min(MAX_WORKER_COUNT),
            poll_interval: self.poll_interval.max(MIN_INTERVAL),
            keep_alive_interval,
            keep_alive_period,
            keep_alive_retry_interval,
            retry_interval,
            retry_factor,
            retry_limit: self.retry_limit.max(1),
            max_retry_interval: self.max_retry_interval.clamp(retry_interval, DAY),
            prune_interval: self.prune_interval.clamp(MINUTE, DAY),
            keep_finished: self.keep_finished.min(5 * 366 * DAY),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
