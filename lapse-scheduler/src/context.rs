//! Shared worker context
//!
//! Everything the background loops of one scheduler instance share:
//! - Storage backend holding the jobs
//! - Handler executing payloads
//! - Clock all timestamps are read from
//! - Clamped configuration

use chrono::{DateTime, Utc};
use lapse_core::{Clock, JobHandler, JobStorage, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;

/// State shared by pollers and the cleaner of one scheduler
pub struct WorkerContext {
    pub storage: Arc<dyn JobStorage>,
    pub handler: Arc<dyn JobHandler>,
    pub clock: Arc<dyn Clock>,
    pub config: SchedulerConfig,
}

impl WorkerContext {
    /// Creates a new worker context
    ///
    /// # Arguments
    /// * `storage` - Backend the jobs live in
    /// * `handler` - Executes claimed payloads
    /// * `clock` - Time source for claims, leases and retries
    /// * `config` - Raw configuration, clamped here
    pub fn new(
        storage: Arc<dyn JobStorage>,
        handler: Arc<dyn JobHandler>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            handler,
            clock,
            config: config.clamped(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Lease expiry for a claim or renewal made at `now`
    pub fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        after(now, self.config.keep_alive_period)
    }
}

/// `time + delay`, saturating at the latest representable instant
pub fn after(time: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| time.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `time - delay`, saturating at the earliest representable instant
pub fn before(time: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| time.checked_sub_signed(delay))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
