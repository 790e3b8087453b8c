//! # Framejob - Per-Frame Work-Stealing Job Scheduler
//!
//! A low-latency parallel task scheduler for real-time applications: many
//! short-lived jobs are created, distributed across a fixed pool of worker
//! threads, and reclaimed every frame with minimal synchronization overhead.
//!
//! ## Architecture
//!
//! - **Work-Stealing Deque**: one bounded deque per worker; the owner treats
//!   it as a LIFO stack, idle peers steal FIFO from the opposite end
//! - **Concurrent Pool**: a lock-free, page-growing slot allocator with an
//!   ABA-safe reference-counted free list, backing all job allocation
//! - **Jobs**: pooled callables with fork/join bookkeeping
//! - **Workers**: thread-affine executors; the constructing thread itself
//!   participates as worker 0
//!
//! ## Example
//!
//! ```no_run
//! use framejob::JobSystem;
//!
//! let system = JobSystem::new();
//!
//! let job = system
//!     .spawn(|ctx| {
//!         let child = ctx.spawn_child(|_| println!("child job")).unwrap();
//!         ctx.wait_for(&child);
//!     })
//!     .unwrap();
//!
//! system.wait_for(&job);
//! ```

pub mod context;
pub mod deque;
pub mod job;
pub mod job_system;
pub mod metrics;
pub mod pool;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors),
    /// avoiding SMT contention.
    AvoidSmt,
}

pub use context::JobContext;
pub use deque::{Steal, Stealer, WorkQueue};
pub use job::{Job, JobOutcome, JobState};
pub use job_system::{JobSystem, JobSystemConfig, ShutdownError, SpawnError};
pub use pool::{DefaultBehavior, Handle, ItemBehavior, Pool};

#[cfg(test)]
mod tests;
