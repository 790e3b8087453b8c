//! Job definitions and execution logic.
//!
//! A job is a pooled unit of work: a callable plus fork/join bookkeeping.
//! Jobs are allocated from the shared [`Pool`](crate::pool::Pool), queued on
//! a worker's deque, claimed by exactly one worker, and recycled once the
//! last pinned handle (submitter, queue entry, child back-references) drops.

use crate::context::JobContext;
use crate::pool::Handle;
use std::cell::UnsafeCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

type JobFn = Box<dyn FnOnce(&JobContext<'_>) + Send + 'static>;

const STATE_CREATED: u8 = 0;
const STATE_QUEUED: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_COMPLETED: u8 = 3;

const OUTCOME_UNRESOLVED: u8 = 0;
const OUTCOME_SUCCEEDED: u8 = 1;
const OUTCOME_FAILED: u8 = 2;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Queued,
    Running,
    Completed,
}

/// Result of a job's callable. A panicking callable is contained by the
/// worker and recorded as `Failed`; it never unwinds through the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The callable has not finished yet.
    Unresolved,
    Succeeded,
    Failed,
}

/// A schedulable unit of work.
pub struct Job {
    work: UnsafeCell<Option<JobFn>>,
    /// Pinned back-reference keeping the parent's slot alive until every
    /// child has been recycled.
    parent: Option<Handle<Job>>,
    /// Outstanding work units: one for the job's own callable plus one per
    /// not-yet-finished child. Zero means transitively complete.
    pending: AtomicU32,
    state: AtomicU8,
    outcome: AtomicU8,
}

// The claim CAS (Queued -> Running) guarantees a single thread ever touches
// `work`, so sharing references across workers is sound.
unsafe impl Sync for Job {}

impl Job {
    /// Creates an unparented job.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        Self::with_parent(work, None)
    }

    /// Creates a job holding a pinned reference to its parent.
    pub fn with_parent<F>(work: F, parent: Option<Handle<Job>>) -> Self
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        Job {
            work: UnsafeCell::new(Some(Box::new(work))),
            parent,
            pending: AtomicU32::new(1),
            state: AtomicU8::new(STATE_CREATED),
            outcome: AtomicU8::new(OUTCOME_UNRESOLVED),
        }
    }

    pub(crate) fn mark_queued(&self) {
        self.state.store(STATE_QUEUED, Ordering::Release);
    }

    pub(crate) fn add_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Rollback for a spawn that was never enqueued. The caller still holds
    /// the parent's own callable unit, so this cannot reach zero.
    pub(crate) fn remove_pending(&self) {
        let prior = self.pending.fetch_sub(1, Ordering::AcqRel);
        assert!(prior > 0, "pending subjob counter underflow");
    }

    /// Retires one work unit. The unit that drops the count to zero marks
    /// the job transitively complete and retires the parent's unit for it,
    /// so completion propagates from the deepest descendant upward.
    pub(crate) fn retire_pending(&self) {
        let prior = self.pending.fetch_sub(1, Ordering::AcqRel);
        assert!(prior > 0, "pending subjob counter underflow");
        if prior == 1 {
            if let Some(parent) = &self.parent {
                parent.retire_pending();
            }
        }
    }

    /// Number of spawned children (including their descendants) that have
    /// not yet finished. May transiently over-count by one around the moment
    /// the job's own callable returns.
    pub fn pending_children(&self) -> u32 {
        let pending = self.pending.load(Ordering::Acquire);
        if self.state.load(Ordering::Acquire) == STATE_COMPLETED {
            pending
        } else {
            // One unit belongs to the callable itself until `run` retires it.
            pending.saturating_sub(1)
        }
    }

    pub fn state(&self) -> JobState {
        match self.state.load(Ordering::Acquire) {
            STATE_CREATED => JobState::Created,
            STATE_QUEUED => JobState::Queued,
            STATE_RUNNING => JobState::Running,
            _ => JobState::Completed,
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        match self.outcome.load(Ordering::Acquire) {
            OUTCOME_SUCCEEDED => JobOutcome::Succeeded,
            OUTCOME_FAILED => JobOutcome::Failed,
            _ => JobOutcome::Unresolved,
        }
    }

    /// True once the callable has returned and every transitively spawned
    /// descendant has finished. The `Acquire` load pairs with the release
    /// half of the final retirement, so an observer of `true` also observes
    /// all side effects of the whole subtree.
    pub fn is_complete(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    pub fn parent(&self) -> Option<&Handle<Job>> {
        self.parent.as_ref()
    }

    /// Claims and runs the job.
    ///
    /// Claiming is a `Queued -> Running` CAS; a second claimant is a fatal
    /// scheduler bug, not a recoverable condition. The callable runs under
    /// `catch_unwind` and its panic, if any, becomes [`JobOutcome::Failed`].
    pub(crate) fn run(&self, ctx: &JobContext<'_>) {
        if self
            .state
            .compare_exchange(
                STATE_QUEUED,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            panic!("job claimed by more than one worker");
        }

        // Exclusive access: the CAS above admitted exactly one claimant.
        let work = unsafe { (*self.work.get()).take() };
        let work = work.expect("claimed job has no callable");

        let result = panic::catch_unwind(AssertUnwindSafe(|| work(ctx)));
        let outcome = if result.is_ok() {
            OUTCOME_SUCCEEDED
        } else {
            OUTCOME_FAILED
        };

        self.outcome.store(outcome, Ordering::Release);
        self.state.store(STATE_COMPLETED, Ordering::Release);

        // The callable's own unit. Children retire theirs when their whole
        // subtree has finished, cascading the last one up through the parent
        // chain.
        self.retire_pending();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The callable is opaque (and possibly already consumed); show the
        // bookkeeping only.
        f.debug_struct("Job")
            .field("state", &self.state())
            .field("outcome", &self.outcome())
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
