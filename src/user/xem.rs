//! Counting Semaphore
//!
//! A test-and-set guard word protects the count and a FIFO ring of
//! waiter tids. A waiter that drives the count negative publishes its
//! tid in a ring slot and futex-waits on that slot; unlock wakes the
//! slot at the head. The guard spin loop yields for a tick once every
//! SLEEPTIME iterations so a held guard cannot starve the holder.

use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use crate::kern::param::{SLEEPTIME, XEMQSZ};
use crate::user::Sys;

/// Ring slot value meaning "no waiter"
const UNUSED: i32 = -1;

// ============================================================================
// Waiter ring
// ============================================================================

/// FIFO ring of waiter tids
#[derive(Debug)]
pub struct WaitRing {
    head: AtomicUsize,
    rear: AtomicUsize,
    slots: [AtomicI32; XEMQSZ],
}

impl WaitRing {
    fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            rear: AtomicUsize::new(0),
            slots: core::array::from_fn(|_| AtomicI32::new(UNUSED)),
        }
    }

    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.rear.load(Ordering::Relaxed)
    }

    /// Publish a waiter at the tail; returns its slot index, or None
    /// when the ring is full
    fn add(&self, key: i32) -> Option<usize> {
        let rear = self.rear.load(Ordering::Relaxed);
        let next = (rear + 1) % XEMQSZ;
        if next == self.head.load(Ordering::Relaxed) {
            return None;
        }
        self.slots[rear].store(key, Ordering::SeqCst);
        self.rear.store(next, Ordering::Relaxed);
        Some(rear)
    }

    /// Slot index of the oldest waiter
    fn head_slot(&self) -> usize {
        self.head.load(Ordering::Relaxed)
    }

    /// Drop the oldest waiter
    fn remove(&self) {
        let head = self.head.load(Ordering::Relaxed);
        self.slots[head].store(UNUSED, Ordering::SeqCst);
        self.head.store((head + 1) % XEMQSZ, Ordering::Relaxed);
    }
}

// ============================================================================
// Semaphore
// ============================================================================

/// A counting semaphore with a FIFO waiter queue
#[derive(Debug)]
pub struct Xem {
    guard: AtomicI32,
    count: AtomicI32,
    q: WaitRing,
}

impl Xem {
    /// A binary semaphore (count 1), the initialization the lock-like
    /// uses want
    pub fn new() -> Self {
        Self {
            guard: AtomicI32::new(0),
            count: AtomicI32::new(1),
            q: WaitRing::new(),
        }
    }

    /// Current count; negative means that many waiters
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::SeqCst)
    }

    fn acquire_guard<S: Sys>(&self, sys: &S) {
        let mut timer = 0;
        while self.guard.swap(1, Ordering::Acquire) == 1 {
            timer += 1;
            if timer >= SLEEPTIME {
                timer = 0;
                sys.sleep(1);
            }
        }
    }

    fn release_guard(&self) {
        self.guard.store(0, Ordering::Release);
    }

    /// P: take one unit, blocking when none is available
    pub fn wait<S: Sys>(&self, sys: &S) -> i32 {
        self.acquire_guard(sys);
        let count = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        if count >= 0 {
            self.release_guard();
            return 0;
        }

        let tid = sys.gettid();
        let slot = match self.q.add(tid.0 as i32) {
            Some(slot) => slot,
            None => {
                self.count.fetch_add(1, Ordering::SeqCst);
                self.release_guard();
                return -1;
            }
        };
        self.release_guard();
        if sys.futex_wait(&self.q.slots[slot], tid) < 0 {
            return -1;
        }
        0
    }

    /// V: return one unit, waking the oldest waiter if any
    pub fn unlock<S: Sys>(&self, sys: &S) -> i32 {
        self.acquire_guard(sys);
        self.count.fetch_add(1, Ordering::SeqCst);
        if !self.q.is_empty() {
            sys.futex_wake(&self.q.slots[self.q.head_slot()]);
            self.q.remove();
        }
        self.release_guard();
        0
    }
}
