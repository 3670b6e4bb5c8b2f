//! User-space blocking primitives
//!
//! The counting semaphore, the readers-writer lock built over it and
//! the file guard all live on the user side of the system-call
//! boundary: their fast paths are plain atomics, and only contended
//! paths enter the kernel through futexes. The [`Sys`] trait is that
//! boundary; the kernel's syscall layer implements it for real
//! threads, and hosted tests mock it.

use core::sync::atomic::AtomicI32;

use crate::types::Tid;

pub mod guard;
pub mod rwlock;
pub mod xem;

pub use guard::ThreadSafeGuard;
pub use rwlock::RwLock;
pub use xem::Xem;

/// The system calls the primitives are built on
pub trait Sys {
    /// Caller's thread id
    fn gettid(&self) -> Tid;
    /// Block while `*addr` still holds `tid`
    fn futex_wait(&self, addr: &AtomicI32, tid: Tid) -> i32;
    /// Wake the thread whose tid is in `*addr`
    fn futex_wake(&self, addr: &AtomicI32) -> i32;
    /// Yield the CPU for `ticks` timer ticks
    fn sleep(&self, ticks: u32) -> i32;
    /// Positional read
    fn pread(&self, fd: i32, buf: &mut [u8], off: usize) -> i32;
    /// Positional write
    fn pwrite(&self, fd: i32, buf: &[u8], off: usize) -> i32;
}
