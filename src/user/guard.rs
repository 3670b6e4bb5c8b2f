//! Thread-Safe File Guard
//!
//! Wraps a file descriptor with a readers-writer lock so concurrent
//! positional reads share and writes exclude. The I/O itself is the
//! positional-I/O collaborator behind [`Sys`].

use crate::user::{RwLock, Sys};

/// An fd plus the lock that serializes access to it
#[derive(Debug)]
pub struct ThreadSafeGuard {
    fd: i32,
    lock: RwLock,
}

impl ThreadSafeGuard {
    pub fn new(fd: i32) -> Self {
        Self {
            fd,
            lock: RwLock::new(),
        }
    }

    /// The wrapped descriptor
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Read `buf.len()` bytes at `off` under the read lock
    pub fn pread<S: Sys>(&self, sys: &S, buf: &mut [u8], off: usize) -> i32 {
        if self.lock.acquire_readlock(sys) < 0 {
            return -1;
        }
        let result = sys.pread(self.fd, buf, off);
        if self.lock.release_readlock(sys) < 0 {
            return -1;
        }
        result
    }

    /// Write `buf` at `off` under the write lock
    pub fn pwrite<S: Sys>(&self, sys: &S, buf: &[u8], off: usize) -> i32 {
        if self.lock.acquire_writelock(sys) < 0 {
            return -1;
        }
        let result = sys.pwrite(self.fd, buf, off);
        if self.lock.release_writelock(sys) < 0 {
            return -1;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::xem::tests::MockSys;

    const BSIZE: usize = 512;

    #[test]
    fn test_blocks_written_read_back_intact() {
        let sys = MockSys::new();
        let guard = ThreadSafeGuard::new(3);

        // Writers stamp whole blocks with their signature.
        for (w, sig) in [(0usize, 0x11u8), (2, 0x22), (5, 0x33)] {
            let block = [sig; BSIZE];
            assert_eq!(
                guard.pwrite(&sys, &block, w * BSIZE),
                BSIZE as i32
            );
        }

        // Every block reads back all-signature or untouched, never a
        // mix within one block.
        for b in 0..6 {
            let mut buf = [0u8; BSIZE];
            let n = guard.pread(&sys, &mut buf, b * BSIZE);
            assert_eq!(n, BSIZE as i32);
            let first = buf[0];
            assert!(buf.iter().all(|&x| x == first), "torn block {}", b);
        }
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let sys = MockSys::new();
        let guard = ThreadSafeGuard::new(3);
        let mut buf = [0u8; 16];
        assert_eq!(guard.pread(&sys, &mut buf, 4096), 0);
    }

    #[test]
    fn test_io_failures_do_not_wedge_the_lock() {
        let sys = MockSys::new();
        let guard = ThreadSafeGuard::new(3);
        let block = [7u8; 64];
        assert_eq!(guard.pwrite(&sys, &block, 0), 64);

        // The lock cycles cleanly, so a follow-up reader never queues.
        let mut buf = [0u8; 64];
        assert_eq!(guard.pread(&sys, &mut buf, 0), 64);
        assert!(sys.waits.borrow().is_empty());
        assert_eq!(buf, block);
    }
}
