//! Bounded work-stealing deque.
//!
//! Each worker owns one `WorkQueue` and treats it as a LIFO stack: recently
//! pushed jobs are the finest-grained subdivisions of work and stay hot in
//! cache. Thieves take from the opposite end through a `Stealer`, so stolen
//! work is the oldest (coarsest) job and contention with the owner only
//! arises when a single item remains. That race is arbitrated by a CAS on
//! the `top` index.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicIsize, Ordering};
use std::sync::Arc;

/// Result of a steal attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Steal<T> {
    /// An item was taken from the top of the queue.
    Success(T),
    /// The queue was observed empty.
    Empty,
    /// Lost a race with the owner or another thief; trying again may succeed.
    Retry,
}

struct Buffer<T> {
    /// Index of the next item thieves take. Only ever increases.
    top: CachePadded<AtomicIsize>,
    /// Index one past the owner's most recent push. Written only by the owner.
    bottom: CachePadded<AtomicIsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

unsafe impl<T: Send> Send for Buffer<T> {}
unsafe impl<T: Send> Sync for Buffer<T> {}

impl<T> Buffer<T> {
    /// Reads the item at a logical index without taking ownership.
    ///
    /// Callers must either win the arbitration for the index (and thereby own
    /// the value) or forget the result. The read is speculative and may race
    /// with the owner rewriting the slot after the ring wraps: the owner only
    /// reuses the slot once `top` has advanced past `index` (the full check in
    /// `push`), and any advance of `top` makes the reader's CAS on `index`
    /// fail. A possibly-torn value is therefore always forgotten bit-for-bit,
    /// never dropped or handed out.
    unsafe fn read(&self, index: isize) -> T {
        let slot = &self.slots[index as usize & self.mask];
        (*slot.get()).as_ptr().read()
    }

    unsafe fn write(&self, index: isize, item: T) {
        let slot = &self.slots[index as usize & self.mask];
        (*slot.get()).write(item);
    }
}

/// Owner side of the deque. `Send` but deliberately `!Sync`: push and pop are
/// single-writer operations and must stay on the owning thread.
pub struct WorkQueue<T> {
    buffer: Arc<Buffer<T>>,
    _not_sync: PhantomData<*mut ()>,
}

unsafe impl<T: Send> Send for WorkQueue<T> {}

/// Thief side of the deque. Cheap to clone and share across workers.
pub struct Stealer<T> {
    buffer: Arc<Buffer<T>>,
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Stealer {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Creates a queue with at least `capacity` slots (rounded up to a power
    /// of two). Capacity is fixed for the lifetime of the queue.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        WorkQueue {
            buffer: Arc::new(Buffer {
                top: CachePadded::new(AtomicIsize::new(0)),
                bottom: CachePadded::new(AtomicIsize::new(0)),
                slots,
                mask: capacity - 1,
            }),
            _not_sync: PhantomData,
        }
    }

    /// Returns the fixed slot capacity.
    pub fn capacity(&self) -> usize {
        self.buffer.mask + 1
    }

    /// Creates a handle other workers use to steal from this queue.
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Pushes an item onto the bottom of the queue.
    ///
    /// Fails when the queue is full, handing the item back so the caller can
    /// surface a saturation error instead of silently corrupting the ring.
    pub fn push(&self, item: T) -> Result<(), T> {
        let buf = &self.buffer;
        let b = buf.bottom.load(Ordering::Relaxed);
        let t = buf.top.load(Ordering::Acquire);

        // `top` only grows, so a stale read can only under-count free space.
        if b.wrapping_sub(t) >= self.capacity() as isize {
            return Err(item);
        }

        unsafe { buf.write(b, item) };
        buf.bottom.store(b.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the most recently pushed item (LIFO end).
    pub fn pop(&self) -> Option<T> {
        let buf = &self.buffer;
        let b = buf.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        buf.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = buf.top.load(Ordering::Relaxed);

        if t <= b {
            if t == b {
                // One item left and thieves may be after it; the CAS on `top`
                // decides who gets it.
                let item = unsafe { buf.read(b) };
                let won = buf
                    .top
                    .compare_exchange(
                        t,
                        t.wrapping_add(1),
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    )
                    .is_ok();
                buf.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
                if won {
                    Some(item)
                } else {
                    // A thief owns the value now; our speculative read must
                    // not be dropped.
                    std::mem::forget(item);
                    None
                }
            } else {
                Some(unsafe { buf.read(b) })
            }
        } else {
            // Queue was already empty; restore bottom.
            buf.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            None
        }
    }

    /// Returns true when the queue looks empty from the owner's side.
    pub fn is_empty(&self) -> bool {
        let b = self.buffer.bottom.load(Ordering::Relaxed);
        let t = self.buffer.top.load(Ordering::Relaxed);
        t >= b
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        // Remaining items are discarded unrun.
        while self.pop().is_some() {}
    }
}

impl<T> Stealer<T> {
    /// Attempts to take the oldest item (FIFO end).
    pub fn steal(&self) -> Steal<T> {
        let buf = &self.buffer;
        let t = buf.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = buf.bottom.load(Ordering::Acquire);

        if t < b {
            // Speculative: a wrapping owner can rewrite this slot, but only
            // after `top` moves past `t`, which makes the CAS below fail and
            // the possibly-torn value gets forgotten without being read.
            let item = unsafe { buf.read(t) };
            if buf
                .top
                .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                Steal::Success(item)
            } else {
                // Someone else claimed index `t`; the value is theirs.
                std::mem::forget(item);
                Steal::Retry
            }
        } else {
            Steal::Empty
        }
    }
}
