//! Lapse Scheduler
//!
//! Executes jobs held by any [`lapse_core::JobStorage`] backend.
//!
//! Architecture:
//! - Poller: claims due jobs and runs the handler, one job at a time per worker
//! - Lease keep-alive: extends the claim while the handler runs and detects hijacks
//! - Cleaner: prunes old finished jobs with adaptive, jittered pacing
//! - Agent: restarts a failed or panicked loop after a randomized delay
//! - Scheduler: clamps configuration, starts the loops, schedules and shuts down
//!
//! Mutual exclusion between workers is delegated entirely to the storage claim.

pub mod context;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use scheduler::{Scheduler, SchedulerBuilder};
