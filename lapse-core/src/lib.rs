//! Lapse Core
//!
//! Core types and abstractions for the Lapse delayed-job scheduler.
//!
//! This crate contains:
//! - Domain types: jobs, payloads and worker identities
//! - The storage contract every persistence backend implements
//! - Scheduler configuration and its clamping rules
//! - The exponential retry backoff policy
//! - Clock and cancellation primitives shared by all background loops
//! - Job handlers and the payload-kind registry
//! - An in-memory storage backend for development and testing
//!
//! Note: Polling and execution live in `lapse-scheduler`, SQL persistence in
//! `lapse-postgres`.

pub mod backoff;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod domain;
pub mod handler;
pub mod memory;
pub mod storage;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

pub use cancel::{CancelSource, Cancellation};
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use config::SchedulerConfig;
pub use domain::job::{Job, JobStatus, WorkerId};
pub use domain::payload::{JobKind, Payload};
pub use handler::{HandlerRegistry, JobHandler};
pub use memory::MemoryJobStorage;
pub use storage::{JobStorage, StorageError};
