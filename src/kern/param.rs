//! Kernel Parameters
//!
//! Boundary constants for the process table, the scheduler pair and the
//! user-level synchronization primitives, plus the per-level quantum and
//! stride arithmetic helpers.

// ============================================================================
// Process table
// ============================================================================

/// Number of process-table slots, preallocated at boot
pub const NPROC: usize = 64;

/// Open files per process
pub const NOFILE: usize = 16;

/// Size of a memory page
pub const PGSIZE: usize = 4096;

/// Kernel stack size (one page)
pub const KSTACKSIZE: usize = PGSIZE;

/// User stack span reserved for each thread
pub const USTACKSIZE: usize = PGSIZE;

/// Trap-return sentinel pushed under a new thread's start routine.
/// Falling off the routine "returns" here and traps into thread_exit(0).
pub const MAGICEXIT: usize = 0xDEAD_BEEF;

// ============================================================================
// MLFQ
// ============================================================================

/// Number of feedback-queue levels (0 = highest priority)
pub const QSIZE: usize = 3;

/// Ticks between priority boosts
pub const BOOSTPERIOD: u64 = 100;

/// Inter-thread micro-quantum: sched hands off to a sibling until the
/// group's tick count crosses a DTQ boundary
pub const DTQ: u32 = 5;

/// Time quantum for a level, in ticks
pub const fn tq(level: usize) -> u32 {
    match level {
        0 => 1,
        1 => 2,
        _ => 4,
    }
}

/// Time allotment before demotion from a level, in ticks.
/// The lowest level never demotes.
pub const fn ta(level: usize) -> u32 {
    match level {
        0 => 5,
        _ => 10,
    }
}

// ============================================================================
// Stride
// ============================================================================

/// Total tickets shared by the stride groups and the MLFQ pool
pub const TOTALTICKETS: u32 = 100;

/// Minimum tickets reserved for the MLFQ pool
pub const RESERVE: u32 = 20;

/// Stride numerator: a group advances by LARGENUM / tickets per quantum
pub const LARGENUM: i32 = 1000;

/// Largest representable pass value
pub const MAXINT: i32 = 0x7FFF_FFFF;

/// Pass threshold that triggers global renormalization
pub const BARRIER: i32 = 0x6FFF_FFFF;

/// Per-quantum pass increment for a given ticket count
pub const fn stride_of(tickets: u32) -> i32 {
    LARGENUM / tickets as i32
}

// ============================================================================
// User-level synchronization
// ============================================================================

/// Semaphore waiter-queue depth
pub const XEMQSZ: usize = 64;

/// Spin iterations before a semaphore guard loop yields for a tick
pub const SLEEPTIME: u32 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quanta() {
        assert_eq!(tq(0), 1);
        assert_eq!(tq(1), 2);
        assert_eq!(tq(2), 4);
        assert_eq!(ta(0), 5);
        assert_eq!(ta(1), 10);
    }

    #[test]
    fn test_stride_of() {
        assert_eq!(stride_of(100), 10);
        assert_eq!(stride_of(RESERVE), 50);
        assert_eq!(stride_of(1), LARGENUM);
    }

    #[test]
    fn test_barrier_below_maxint() {
        // Renormalization must trigger with headroom left before the
        // largest pass increment can overflow.
        assert!(BARRIER as i64 + stride_of(1) as i64 <= MAXINT as i64);
    }
}
