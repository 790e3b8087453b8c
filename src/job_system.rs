//! High-level job system interface.
//!
//! The `JobSystem` owns the fixed worker set, the shared job pool, and the
//! backing OS threads. The constructing thread participates as worker 0 and
//! drives it through [`spawn`](JobSystem::spawn), [`help`](JobSystem::help),
//! and [`wait_for`](JobSystem::wait_for); workers 1..N get dedicated threads
//! that run until shutdown.

use crate::context::JobContext;
use crate::deque::WorkQueue;
use crate::job::Job;
use crate::pool::{Handle, Pool};
use crate::worker::{Shared, Worker};
use crate::PinningStrategy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Configuration for the job system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSystemConfig {
    /// Number of workers. Defaults to hardware concurrency.
    pub worker_count: Option<usize>,
    /// Per-worker deque capacity; rounded up to a power of two.
    pub queue_capacity: usize,
    /// Slots per job-pool page.
    pub page_capacity: u32,
    /// CPU pinning for dedicated worker threads.
    pub pinning: PinningStrategy,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            queue_capacity: 2048,
            page_capacity: 256,
            pinning: PinningStrategy::None,
        }
    }
}

/// A spawn was rejected. The job was not queued and any parent bookkeeping
/// has been rolled back.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The worker's queue is at capacity. Draining via `help` (or letting
    /// peers steal) makes room.
    #[error("worker queue full ({capacity} jobs queued); scheduler saturated")]
    Saturated { capacity: usize },
}

/// Shutdown completed but not cleanly.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("{panicked} worker thread(s) panicked")]
    WorkersPanicked { panicked: usize },
}

/// The main job system managing workers, the job pool, and thread lifecycle.
pub struct JobSystem {
    shared: Arc<Shared>,
    /// Worker 0, driven by whichever thread owns the `JobSystem`.
    local: Worker,
    threads: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Creates a job system with default configuration (one worker per
    /// hardware thread).
    pub fn new() -> Self {
        Self::with_config(JobSystemConfig::default())
    }

    /// Creates a job system with explicit configuration.
    pub fn with_config(config: JobSystemConfig) -> Self {
        let worker_count = config
            .worker_count
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1);

        let queues: Vec<WorkQueue<Handle<Job>>> = (0..worker_count)
            .map(|_| WorkQueue::with_capacity(config.queue_capacity))
            .collect();
        let stealers = queues.iter().map(|q| q.stealer()).collect();

        let shared = Arc::new(Shared {
            stealers,
            pool: Pool::new(config.page_capacity),
            stop: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::Metrics::new(),
        });

        let mut queues = queues.into_iter();
        let local = Worker::new(
            0,
            queues.next().expect("worker count is at least one"),
            Arc::clone(&shared),
        );

        let mut threads = Vec::with_capacity(worker_count - 1);
        for (index, queue) in queues.enumerate() {
            let id = index + 1;
            let worker = Worker::new(id, queue, Arc::clone(&shared));
            let pinning = config.pinning;
            let handle = thread::Builder::new()
                .name(format!("framejob-worker-{id}"))
                .spawn(move || {
                    pin_worker(id, pinning);
                    worker.run();
                })
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }

        JobSystem {
            shared,
            local,
            threads,
        }
    }

    /// Enqueues a root job on the calling thread's worker (worker 0).
    pub fn spawn<F>(&self, work: F) -> Result<Handle<Job>, SpawnError>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.local.spawn_job(None, work)
    }

    /// Runs jobs on the calling thread until `job` completes.
    ///
    /// Worker 0 pops its own queue and steals like any other worker while
    /// waiting, so the caller contributes to the work it is joining on.
    pub fn wait_for(&self, job: &Handle<Job>) {
        while !job.is_complete() {
            if !self.local.try_run_one() {
                thread::yield_now();
            }
        }
    }

    /// Runs at most one queued job on the calling thread. Returns false when
    /// no work was found.
    pub fn help(&self) -> bool {
        self.local.try_run_one()
    }

    /// Total number of workers, the caller-driven worker 0 included.
    pub fn worker_count(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Snapshot of the scheduler counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Signals every worker to stop and joins their threads.
    ///
    /// Jobs already claimed by a worker run to completion; jobs still queued
    /// are discarded unrun. Reports workers that died to a contract
    /// violation instead of a contained job panic.
    pub fn shutdown(mut self) -> Result<(), ShutdownError> {
        let panicked = self.stop_and_join();
        if panicked > 0 {
            Err(ShutdownError::WorkersPanicked { panicked })
        } else {
            Ok(())
        }
    }

    fn stop_and_join(&mut self) -> usize {
        self.shared.stop.store(true, Ordering::Relaxed);
        let mut panicked = 0;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        panicked
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn pin_worker(id: usize, strategy: PinningStrategy) {
    let cores = match strategy {
        PinningStrategy::None => return,
        _ => core_affinity::get_core_ids(),
    };
    let Some(cores) = cores else { return };

    let target = match strategy {
        PinningStrategy::None => unreachable!(),
        PinningStrategy::Linear => id,
        // Even logical processors map to distinct physical cores on SMT
        // systems.
        PinningStrategy::AvoidSmt => id * 2,
    };
    if target < cores.len() {
        core_affinity::set_for_current(cores[target]);
    }
}
