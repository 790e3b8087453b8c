//! Explicit job context threaded through the run loop.
//!
//! Code running inside a job receives a `JobContext` instead of reaching for
//! ambient thread-local state. The context identifies the executing worker
//! and the current job, and is the only way to spawn children relative to
//! the running job.

use crate::job::Job;
use crate::job_system::SpawnError;
use crate::pool::Handle;
use crate::worker::Worker;

/// Capabilities available to a running job.
pub struct JobContext<'a> {
    worker: &'a Worker,
    current: Option<&'a Handle<Job>>,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(worker: &'a Worker, current: Option<&'a Handle<Job>>) -> Self {
        JobContext { worker, current }
    }

    /// Index of the worker executing this job.
    pub fn worker_id(&self) -> usize {
        self.worker.id()
    }

    /// The job currently executing on this worker, if any.
    pub fn current_job(&self) -> Option<&Handle<Job>> {
        self.current
    }

    /// Spawns a child of the current job onto this worker's own queue.
    ///
    /// The child pins the parent's pool slot and bumps its pending-children
    /// counter; [`wait_for_children`](Self::wait_for_children) joins on it.
    pub fn spawn_child<F>(&self, work: F) -> Result<Handle<Job>, SpawnError>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.worker.spawn_job(self.current, work)
    }

    /// Spawns an unparented job onto this worker's own queue.
    pub fn spawn_detached<F>(&self, work: F) -> Result<Handle<Job>, SpawnError>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.worker.spawn_job(None, work)
    }

    /// Runs at most one queued job on this worker. Returns false when no
    /// work was found. Useful for draining after a saturated spawn.
    pub fn help(&self) -> bool {
        self.worker.try_run_one()
    }

    /// Runs jobs (own queue first, then steals) until `job` completes.
    ///
    /// This is a cooperative join: the waiting worker keeps executing other
    /// jobs, so a fixed worker set cannot deadlock on the barrier.
    pub fn wait_for(&self, job: &Handle<Job>) {
        while !job.is_complete() {
            if !self.worker.try_run_one() {
                std::thread::yield_now();
            }
        }
    }

    /// Joins on every child spawned so far by the current job.
    ///
    /// Returns once the pending-children counter reaches zero, which
    /// happens-after the last descendant in the subtree has fully run
    /// (children only retire their unit once their own children have).
    pub fn wait_for_children(&self) {
        let Some(current) = self.current else {
            return;
        };
        while current.pending_children() != 0 {
            if !self.worker.try_run_one() {
                std::thread::yield_now();
            }
        }
    }
}
