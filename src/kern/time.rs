//! Kernel Time - the global tick counter
//!
//! The timer interrupt collaborator calls [`tick`] once per tick; user
//! code reads the count back through the `uptime` system call and the
//! `sleep(n)` syscall parks callers until the count passes a deadline
//! (the wakeup itself is issued by the scheduler module, which owns the
//! sleep list).

use core::sync::atomic::{AtomicU64, Ordering};

/// Ticks since boot
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Current tick count
pub fn uptime() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Advance the tick count; returns the new value
pub fn tick() -> u64 {
    TICKS.fetch_add(1, Ordering::SeqCst) + 1
}

/// Reset the counter (test support)
#[cfg(test)]
pub fn reset() {
    TICKS.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_advances_uptime() {
        let before = uptime();
        let now = tick();
        assert!(now > before);
        assert!(uptime() >= now);
    }
}
