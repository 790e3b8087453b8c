//! Lock-free concurrent object pool.
//!
//! Every per-frame object (jobs included) is allocated from a `Pool` so the
//! hot path never touches the global allocator or a lock. Storage is a chain
//! of fixed-capacity pages that only ever grows; recycled slots circulate on
//! a lock-free free list.
//!
//! The free list is ABA-safe: each slot carries a reference count whose high
//! bit means "this slot should currently be on the free list". A slot is only
//! physically linked back in once its count provably drops to zero after that
//! bit was set, and whichever thread performs the zeroing transition owns the
//! re-link attempt. Getting a slot optimistically bumps its count, validates
//! the head with a CAS, then drops two references (the traversal ref and the
//! list's own ref), leaving exactly one live reference for the caller.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

const REFS_MASK: u32 = 0x7FFF_FFFF;
const SHOULD_BE_ON_FREELIST: u32 = 0x8000_0000;

/// Injected construction/destruction hooks for pooled items.
///
/// `on_fetch` runs right after a value is moved into a slot, `on_return`
/// right before it is dropped back into circulation. The default behavior
/// does nothing; pools for components or jobs can install their own.
pub trait ItemBehavior<T>: Send + Sync {
    fn on_fetch(&self, _item: &mut T) {}
    fn on_return(&self, _item: &mut T) {}
}

/// No-op behavior used by `Pool::new`.
pub struct DefaultBehavior;

impl<T> ItemBehavior<T> for DefaultBehavior {}

/// Fixed-size storage for one pooled item plus free-list bookkeeping.
struct Slot<T> {
    /// Low 31 bits: live references during free-list traversal.
    /// High bit: the slot should be (re-)linked onto the free list.
    refs: AtomicU32,
    /// Next slot in the free list; meaningful only while linked or pending.
    next: AtomicPtr<Slot<T>>,
    /// Outstanding `Handle` clones. The last drop recycles the slot.
    pins: AtomicU32,
    /// Contract flag: set while `data` holds a live value.
    constructed: AtomicBool,
    data: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Slot {
            refs: AtomicU32::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
            pins: AtomicU32::new(0),
            constructed: AtomicBool::new(false),
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

struct FreeList<T> {
    head: CachePadded<AtomicPtr<Slot<T>>>,
}

impl<T> FreeList<T> {
    fn new() -> Self {
        FreeList {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Returns a slot to circulation.
    ///
    /// # Safety
    /// `node` must point to a live slot owned by this pool, with no handle
    /// pins remaining and `constructed` cleared.
    unsafe fn add(&self, node: NonNull<Slot<T>>) {
        // The should-be-on-freelist bit is clear here, so setting it with a
        // fetch_add is fine. If the count was already zero nobody else can
        // race the link; otherwise the thread that zeroes it will link.
        if node
            .as_ref()
            .refs
            .fetch_add(SHOULD_BE_ON_FREELIST, Ordering::Release)
            == 0
        {
            self.add_knowing_refcount_is_zero(node);
        }
    }

    /// Links `node` at the head. May only be called by the thread that
    /// observed the reference count drop to zero with the flag bit set.
    unsafe fn add_knowing_refcount_is_zero(&self, node: NonNull<Slot<T>>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            node.as_ref().next.store(head, Ordering::Relaxed);
            node.as_ref().refs.store(1, Ordering::Release);
            match self.head.compare_exchange(
                head,
                node.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => {
                    // The link failed and other threads may have grabbed
                    // traversal refs in the meantime. Re-flag the slot; only
                    // if we still hold the sole reference may we retry,
                    // otherwise the next thread to zero the count will.
                    if node
                        .as_ref()
                        .refs
                        .fetch_add(SHOULD_BE_ON_FREELIST.wrapping_sub(1), Ordering::Release)
                        != 1
                    {
                        return;
                    }
                    head = current;
                }
            }
        }
    }

    /// Pops a slot, or `None` if the list is empty.
    ///
    /// The returned slot carries exactly one live reference for the caller.
    unsafe fn try_get(&self) -> Option<NonNull<Slot<T>>> {
        let mut head = self.head.load(Ordering::Acquire);
        while let Some(node) = NonNull::new(head) {
            let refs = node.as_ref().refs.load(Ordering::Relaxed);
            if refs & REFS_MASK == 0
                || node
                    .as_ref()
                    .refs
                    .compare_exchange(refs, refs + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_err()
            {
                head = self.head.load(Ordering::Acquire);
                continue;
            }

            // We hold a traversal ref, so `next` is stable until the CAS.
            let next = node.as_ref().next.load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange(node.as_ptr(), next, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // The slot was on the list, so its flag bit must be clear.
                debug_assert!(
                    node.as_ref().refs.load(Ordering::Relaxed) & SHOULD_BE_ON_FREELIST == 0
                );
                // Drop the traversal ref and the list's ref, leaving one
                // live reference for the caller.
                node.as_ref().refs.fetch_sub(2, Ordering::Relaxed);
                return Some(node);
            }

            // Head moved under us; give the traversal ref back. If that
            // zeroes a flagged count, the re-link duty falls to us.
            let prior = node.as_ref().refs.fetch_sub(1, Ordering::AcqRel);
            if prior == SHOULD_BE_ON_FREELIST + 1 {
                self.add_knowing_refcount_is_zero(node);
            }
            head = self.head.load(Ordering::Acquire);
        }
        None
    }
}

/// A fixed-capacity array of slots. Pages form an append-only chain and are
/// freed only at pool teardown.
struct Page<T> {
    used: AtomicU32,
    next: AtomicPtr<Page<T>>,
    slots: Box<[Slot<T>]>,
}

impl<T> Page<T> {
    fn new(capacity: u32) -> Box<Self> {
        let slots = (0..capacity)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::new(Page {
            used: AtomicU32::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
            slots,
        })
    }
}

struct Storage<T> {
    first: AtomicPtr<Page<T>>,
    tail: AtomicPtr<Page<T>>,
    page_count: AtomicU32,
    page_capacity: u32,
}

impl<T> Storage<T> {
    fn new(page_capacity: u32) -> Self {
        let first = Box::into_raw(Page::new(page_capacity));
        Storage {
            first: AtomicPtr::new(first),
            tail: AtomicPtr::new(first),
            page_count: AtomicU32::new(1),
            page_capacity,
        }
    }

    /// Claims a never-used slot, growing the page chain when the current
    /// page runs out. Never blocks and never fails.
    unsafe fn fetch_new_slot(&self) -> NonNull<Slot<T>> {
        loop {
            let tail = &*self.tail.load(Ordering::Acquire);
            let index = tail.used.fetch_add(1, Ordering::Relaxed);

            if index + 1 == self.page_capacity {
                // We claimed the last slot in the page, so we also allocate
                // the next page before handing the slot out.
                let new_page = Box::into_raw(Page::new(self.page_capacity));
                tail.next.store(new_page, Ordering::Release);
                self.tail.store(new_page, Ordering::Release);
                self.page_count.fetch_add(1, Ordering::Relaxed);
                return NonNull::from(&tail.slots[index as usize]);
            } else if index >= self.page_capacity {
                // Overshot a full page; another thread is linking the next
                // one. Yield until the new tail is visible.
                std::thread::yield_now();
            } else {
                return NonNull::from(&tail.slots[index as usize]);
            }
        }
    }
}

impl<T> Drop for Storage<T> {
    fn drop(&mut self) {
        let mut page = self.first.load(Ordering::Relaxed);
        while !page.is_null() {
            unsafe {
                let boxed = Box::from_raw(page);
                for slot in boxed.slots.iter() {
                    if slot.constructed.load(Ordering::Relaxed) {
                        ptr::drop_in_place((*slot.data.get()).as_mut_ptr());
                    }
                }
                page = boxed.next.load(Ordering::Relaxed);
            }
        }
    }
}

struct PoolInner<T> {
    free_list: FreeList<T>,
    storage: Storage<T>,
    behavior: Box<dyn ItemBehavior<T>>,
}

unsafe impl<T: Send> Send for PoolInner<T> {}
unsafe impl<T: Send> Sync for PoolInner<T> {}

/// A lock-free, page-growing object pool.
///
/// Cloning shares the same storage; the pool (and its pages) live until the
/// last clone and the last outstanding [`Handle`] are gone.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Pool<T> {
    /// Creates a pool with `page_capacity` slots per page and no-op item
    /// behavior.
    pub fn new(page_capacity: u32) -> Self {
        Self::with_behavior(page_capacity, DefaultBehavior)
    }

    /// Creates a pool with injected fetch/return hooks.
    pub fn with_behavior<B>(page_capacity: u32, behavior: B) -> Self
    where
        B: ItemBehavior<T> + 'static,
    {
        assert!(page_capacity >= 2, "pool pages need at least two slots");
        Pool {
            inner: Arc::new(PoolInner {
                free_list: FreeList::new(),
                storage: Storage::new(page_capacity),
                behavior: Box::new(behavior),
            }),
        }
    }

    /// Moves `value` into a free slot and returns a handle to it.
    ///
    /// Exhaustion is never an error: when the free list is empty the pool
    /// grows by another slot (and, at page boundaries, another page).
    pub fn acquire(&self, value: T) -> Handle<T> {
        let slot = unsafe {
            loop {
                if let Some(slot) = self.inner.free_list.try_get() {
                    break slot;
                }
                // Another thread may snatch the slot we publish here; the
                // loop just grows again until our own try_get succeeds.
                let fresh = self.inner.storage.fetch_new_slot();
                self.inner.free_list.add(fresh);
            }
        };

        unsafe {
            let slot_ref = slot.as_ref();
            assert!(
                !slot_ref.constructed.load(Ordering::Relaxed),
                "pool handed out a slot that still holds a value"
            );
            (*slot_ref.data.get()).write(value);
            slot_ref.constructed.store(true, Ordering::Relaxed);
            self.inner
                .behavior
                .on_fetch(&mut *(*slot_ref.data.get()).as_mut_ptr());
            slot_ref.pins.store(1, Ordering::Release);
        }

        Handle {
            inner: Arc::clone(&self.inner),
            slot,
        }
    }

    /// Destroys the contained value and returns the slot to circulation.
    ///
    /// Equivalent to dropping the handle; recycling is deferred until the
    /// last pinned clone is gone.
    pub fn release(&self, handle: Handle<T>) {
        drop(handle);
    }

    /// Number of pages allocated so far. Monotonic.
    pub fn page_count(&self) -> u32 {
        self.inner.storage.page_count.load(Ordering::Relaxed)
    }

    /// Fixed number of slots per page.
    pub fn page_capacity(&self) -> u32 {
        self.inner.storage.page_capacity
    }
}

/// A pinned reference to a pooled value.
///
/// Clones share the slot; the value is destroyed and the slot recycled when
/// the last clone drops. Handles keep the pool's storage alive.
pub struct Handle<T> {
    inner: Arc<PoolInner<T>>,
    slot: NonNull<Slot<T>>,
}

unsafe impl<T: Send + Sync> Send for Handle<T> {}
unsafe impl<T: Send + Sync> Sync for Handle<T> {}

impl<T> Handle<T> {
    /// True if both handles pin the same slot.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.slot == other.slot
    }

    /// Address of the pooled value, for identity checks in diagnostics.
    pub fn as_ptr(this: &Self) -> *const T {
        unsafe { (*this.slot.as_ref().data.get()).as_ptr() }
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*(*self.slot.as_ref().data.get()).as_ptr() }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        unsafe {
            self.slot.as_ref().pins.fetch_add(1, Ordering::Relaxed);
        }
        Handle {
            inner: Arc::clone(&self.inner),
            slot: self.slot,
        }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        unsafe {
            let slot_ref = self.slot.as_ref();
            if slot_ref.pins.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            assert!(
                slot_ref.constructed.load(Ordering::Relaxed),
                "pool slot released twice"
            );
            let item = &mut *(*slot_ref.data.get()).as_mut_ptr();
            self.inner.behavior.on_return(item);
            ptr::drop_in_place(item);
            slot_ref.constructed.store(false, Ordering::Relaxed);
            self.inner.free_list.add(self.slot);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&**self).finish()
    }
}
