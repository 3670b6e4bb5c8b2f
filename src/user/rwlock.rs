//! Readers-Writer Lock
//!
//! The classic two-semaphore construction: a short-term `lock`
//! serializes the reader counter, and `writelock` is the actual gate.
//! The first reader in takes the gate on behalf of all readers, the
//! last one out releases it; writers go through the gate directly.
//! Neither side gets preference beyond queue order in the semaphores.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::user::{Sys, Xem};

/// A readers-writer lock over two semaphores
#[derive(Debug)]
pub struct RwLock {
    lock: Xem,
    writelock: Xem,
    readers: AtomicI32,
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            lock: Xem::new(),
            writelock: Xem::new(),
            readers: AtomicI32::new(0),
        }
    }

    /// Shared acquire; the first reader claims the write gate
    pub fn acquire_readlock<S: Sys>(&self, sys: &S) -> i32 {
        if self.lock.wait(sys) < 0 {
            return -1;
        }
        let readers = self.readers.fetch_add(1, Ordering::SeqCst) + 1;
        if readers == 1 {
            if self.writelock.wait(sys) < 0 {
                return -1;
            }
        }
        self.lock.unlock(sys)
    }

    /// Shared release; the last reader opens the write gate
    pub fn release_readlock<S: Sys>(&self, sys: &S) -> i32 {
        if self.lock.wait(sys) < 0 {
            return -1;
        }
        let readers = self.readers.fetch_sub(1, Ordering::SeqCst) - 1;
        if readers == 0 {
            if self.writelock.unlock(sys) < 0 {
                return -1;
            }
        }
        self.lock.unlock(sys)
    }

    /// Exclusive acquire
    pub fn acquire_writelock<S: Sys>(&self, sys: &S) -> i32 {
        self.writelock.wait(sys)
    }

    /// Exclusive release
    pub fn release_writelock<S: Sys>(&self, sys: &S) -> i32 {
        self.writelock.unlock(sys)
    }

    /// Current reader count
    pub fn readers(&self) -> i32 {
        self.readers.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::xem::tests::MockSys;

    #[test]
    fn test_readers_share_the_gate() {
        let sys = MockSys::new();
        let rw = RwLock::new();

        sys.tid.set(1);
        assert_eq!(rw.acquire_readlock(&sys), 0);
        sys.tid.set(2);
        assert_eq!(rw.acquire_readlock(&sys), 0);
        assert_eq!(rw.readers(), 2);
        // Only the first reader touched the write gate.
        assert!(sys.waits.borrow().is_empty());

        assert_eq!(rw.release_readlock(&sys), 0);
        sys.tid.set(1);
        assert_eq!(rw.release_readlock(&sys), 0);
        assert_eq!(rw.readers(), 0);
    }

    #[test]
    fn test_writer_blocks_behind_readers() {
        let sys = MockSys::new();
        let rw = RwLock::new();

        sys.tid.set(1);
        assert_eq!(rw.acquire_readlock(&sys), 0);

        // The writer queues on the gate the reader holds.
        sys.tid.set(9);
        assert_eq!(rw.acquire_writelock(&sys), 0);
        assert_eq!(*sys.waits.borrow(), [9]);

        // The last reader out hands the gate to the writer.
        sys.tid.set(1);
        assert_eq!(rw.release_readlock(&sys), 0);
        assert_eq!(*sys.wakes.borrow(), [9]);

        sys.tid.set(9);
        assert_eq!(rw.release_writelock(&sys), 0);
    }

    #[test]
    fn test_writers_exclude_each_other() {
        let sys = MockSys::new();
        let rw = RwLock::new();

        sys.tid.set(1);
        assert_eq!(rw.acquire_writelock(&sys), 0);
        sys.tid.set(2);
        assert_eq!(rw.acquire_writelock(&sys), 0);
        assert_eq!(*sys.waits.borrow(), [2]);

        sys.tid.set(1);
        assert_eq!(rw.release_writelock(&sys), 0);
        assert_eq!(*sys.wakes.borrow(), [2]);
    }
}
