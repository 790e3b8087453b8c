#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional performance counters for the scheduler.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Total number of jobs that finished running.
    pub jobs_completed: AtomicU64,
    /// Pushes onto worker-local queues.
    pub queue_pushes: AtomicU64,
    /// Pops from worker-local queues.
    pub queue_pops: AtomicU64,
    /// Successful steals from peer workers.
    pub steals_success: AtomicU64,
    /// Steal attempts that found the victim empty (or picked self).
    pub steals_failed: AtomicU64,
    /// Steal attempts that lost a race and need retry.
    pub steals_retry: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            queue_pushes: AtomicU64::new(0),
            queue_pops: AtomicU64::new(0),
            steals_success: AtomicU64::new(0),
            steals_failed: AtomicU64::new(0),
            steals_retry: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            queue_pushes: self.queue_pushes.load(Ordering::Relaxed),
            queue_pops: self.queue_pops.load(Ordering::Relaxed),
            steals_success: self.steals_success.load(Ordering::Relaxed),
            steals_failed: self.steals_failed.load(Ordering::Relaxed),
            steals_retry: self.steals_retry.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of scheduler counters at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub queue_pushes: u64,
    pub queue_pops: u64,
    pub steals_success: u64,
    pub steals_failed: u64,
    pub steals_retry: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Jobs per second since the system started.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Approximate queued-but-unrun jobs (pushes minus pops and steals).
    pub fn queue_depth(&self) -> i64 {
        self.queue_pushes as i64 - self.queue_pops as i64 - self.steals_success as i64
    }
}
