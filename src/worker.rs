//! Worker implementation.
//!
//! Each worker owns one work-stealing deque and runs a simple loop: pop the
//! own queue, otherwise steal from a randomly chosen peer, otherwise yield
//! the OS thread. Workers never sleep on a condition variable; idle workers
//! spin-and-yield, trading CPU under light load for wake-up latency.

use crate::context::JobContext;
use crate::deque::{Steal, Stealer, WorkQueue};
use crate::job::Job;
use crate::job_system::SpawnError;
use crate::pool::{Handle, Pool};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// State shared by every worker and the owning job system.
pub(crate) struct Shared {
    /// Steal handles for every worker's queue, indexed by worker id.
    pub(crate) stealers: Vec<Stealer<Handle<Job>>>,
    /// Pool all jobs are allocated from.
    pub(crate) pool: Pool<Job>,
    pub(crate) stop: AtomicBool,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

/// A thread-affine executor owning one work-stealing deque.
pub struct Worker {
    id: usize,
    queue: WorkQueue<Handle<Job>>,
    victim_rng: RefCell<SmallRng>,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(id: usize, queue: WorkQueue<Handle<Job>>, shared: Arc<Shared>) -> Self {
        Worker {
            id,
            queue,
            victim_rng: RefCell::new(SmallRng::from_entropy()),
            shared,
        }
    }

    /// Returns the worker's id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Allocates a job from the shared pool and pushes it onto this worker's
    /// own queue.
    ///
    /// When `parent` is given, the new job pins the parent's slot and bumps
    /// its pending-children counter. A full queue rolls that back and fails
    /// with [`SpawnError::Saturated`] rather than corrupting the ring.
    pub(crate) fn spawn_job<F>(
        &self,
        parent: Option<&Handle<Job>>,
        work: F,
    ) -> Result<Handle<Job>, SpawnError>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        let parent_pin = parent.cloned();
        if let Some(parent) = &parent_pin {
            parent.add_pending();
        }

        let job = self.shared.pool.acquire(Job::with_parent(work, parent_pin));
        job.mark_queued();

        match self.queue.push(job.clone()) {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                self.shared
                    .metrics
                    .queue_pushes
                    .fetch_add(1, Ordering::Relaxed);
                Ok(job)
            }
            Err(_rejected) => {
                if let Some(parent) = parent {
                    parent.remove_pending();
                }
                Err(SpawnError::Saturated {
                    capacity: self.queue.capacity(),
                })
            }
        }
    }

    /// Pops the own queue, or steals from one randomly chosen peer.
    ///
    /// A self-pick and a lost steal race both count as a failed attempt; the
    /// caller decides whether to yield or retry.
    fn pull_job(&self) -> Option<Handle<Job>> {
        if let Some(job) = self.queue.pop() {
            #[cfg(feature = "metrics")]
            self.shared
                .metrics
                .queue_pops
                .fetch_add(1, Ordering::Relaxed);
            return Some(job);
        }

        let victim = self
            .victim_rng
            .borrow_mut()
            .gen_range(0..self.shared.stealers.len());
        if victim == self.id {
            return None;
        }

        match self.shared.stealers[victim].steal() {
            Steal::Success(job) => {
                #[cfg(feature = "metrics")]
                self.shared
                    .metrics
                    .steals_success
                    .fetch_add(1, Ordering::Relaxed);
                Some(job)
            }
            Steal::Retry => {
                #[cfg(feature = "metrics")]
                self.shared
                    .metrics
                    .steals_retry
                    .fetch_add(1, Ordering::Relaxed);
                None
            }
            Steal::Empty => {
                #[cfg(feature = "metrics")]
                self.shared
                    .metrics
                    .steals_failed
                    .fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Runs at most one job. Returns false when no work was found.
    pub(crate) fn try_run_one(&self) -> bool {
        match self.pull_job() {
            Some(job) => {
                self.execute(job);
                true
            }
            None => false,
        }
    }

    fn execute(&self, job: Handle<Job>) {
        let ctx = JobContext::new(self, Some(&job));
        job.run(&ctx);
        #[cfg(feature = "metrics")]
        self.shared
            .metrics
            .jobs_completed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Main loop for a dedicated worker thread. Returns when the stop flag
    /// is observed; jobs still queued at that point are discarded unrun when
    /// the queue drops.
    pub(crate) fn run(&self) {
        while !self.shared.stop.load(Ordering::Relaxed) {
            if !self.try_run_one() {
                std::thread::yield_now();
            }
        }
    }
}
