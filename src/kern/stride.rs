//! Stride Scheduler
//!
//! Proportional CPU shares. Each stride group holds `tickets` and a
//! cumulative `pass`; a group advances by LARGENUM / tickets per
//! quantum and the lowest pass wins. The MLFQ pool is itself a virtual
//! participant (its tickets and pass live on [`Mlfq`]), so the two
//! schedulers split one budget: stride tickets plus pool tickets is
//! always the full 100, and the pool never drops below RESERVE.
//!
//! Groups waiting for the CPU sit in a 1-indexed binary min-heap keyed
//! through `main_of(entry).pass`; a group's representative entry is
//! whichever of its threads was handy (Runnable preferred, Sleeping
//! accepted). Threads of stride groups currently on a CPU sit on the
//! running list instead.

use crate::kern::error::{KernError, Result};
use crate::kern::list::{SlotList, NIL};
use crate::kern::machine::Cpu;
use crate::kern::param::{stride_of, BARRIER, MAXINT, NPROC, RESERVE, TOTALTICKETS};
use crate::kern::proc::{ProcState, ProcTable, SchedClass};

// ============================================================================
// The stride structure
// ============================================================================

/// The stride scheduler state
#[derive(Debug)]
pub struct Stride {
    /// Number of heap entries
    pub size: usize,
    /// 1-indexed min-heap of group representatives
    pub heap: [usize; NPROC + 1],
    /// Stride threads currently on a CPU
    pub run: SlotList,
}

impl Stride {
    /// Boot state: empty heap, nothing running
    pub fn new() -> Self {
        Self {
            size: 0,
            heap: [NIL; NPROC + 1],
            run: SlotList::new(),
        }
    }
}

// ============================================================================
// Heap operations on the table
// ============================================================================

impl ProcTable {
    fn heap_pass(&self, entry: usize) -> i32 {
        self.procs[self.main_of(entry)].pass
    }

    /// Smallest pass waiting in the heap, or MAXINT when empty
    pub fn min_pass(&self) -> i32 {
        if self.stride.size > 0 {
            self.heap_pass(self.stride.heap[1])
        } else {
            MAXINT
        }
    }

    /// Insert a group representative, sifting up on its main's pass
    pub fn push_heap(&mut self, entry: usize) {
        self.stride.size += 1;
        let mut i = self.stride.size;
        let pass = self.heap_pass(entry);
        while i != 1 && pass < self.heap_pass(self.stride.heap[i / 2]) {
            self.stride.heap[i] = self.stride.heap[i / 2];
            i /= 2;
        }
        self.stride.heap[i] = entry;
    }

    /// Remove and return the minimum entry, sifting the last one down.
    /// Equal passes do not swap, so ties keep pop order stable.
    pub fn pop_heap(&mut self) -> usize {
        let min = self.stride.heap[1];
        let last = self.stride.heap[self.stride.size];
        self.stride.size -= 1;

        let mut parent = 1;
        let mut child = 2;
        while child <= self.stride.size {
            if child < self.stride.size
                && self.heap_pass(self.stride.heap[child])
                    > self.heap_pass(self.stride.heap[child + 1])
            {
                child += 1;
            }
            if self.heap_pass(last) <= self.heap_pass(self.stride.heap[child]) {
                break;
            }
            self.stride.heap[parent] = self.stride.heap[child];
            parent = child;
            child *= 2;
        }
        self.stride.heap[parent] = last;
        min
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Grant the calling group a guaranteed CPU share.
    ///
    /// Fails without side effects if the share is out of range or would
    /// squeeze the MLFQ pool below its reserve (a caller that is
    /// already a stride group gets its current share counted back into
    /// the pool first). A newly admitted group leaves the MLFQ queues,
    /// seeds its pass at min(heap minimum, pool pass) so it cannot
    /// instantly dominate, and its calling thread joins the running
    /// list.
    pub fn set_cpu_share(&mut self, cpu: &Cpu, share: i32) -> Result<()> {
        if share < 1 || share as u32 > TOTALTICKETS - RESERVE {
            return Err(KernError::BadArg);
        }
        let share = share as u32;

        let p = cpu.current();
        let main = self.main_of(p);

        let mut remain = self.mlfq.tickets;
        if self.procs[main].class == SchedClass::Stride {
            remain += self.procs[main].tickets;
        }
        if remain < share + RESERVE {
            return Err(KernError::BadArg);
        }

        if self.procs[main].class == SchedClass::Mlfq {
            self.mlfq_dequeue_group(p);
            let seed = self.min_pass().min(self.mlfq.pass);
            self.procs[main].pass = seed;
            let members = self.group_members(main);
            for &th in members.iter() {
                self.procs[th].class = SchedClass::Stride;
            }
            self.stride.run.push_tail(&mut self.sched_links, p);
        }

        self.mlfq.tickets = remain - share;
        self.procs[main].tickets = share;
        Ok(())
    }

    // ========================================================================
    // Post-run accounting
    // ========================================================================

    /// Stride bookkeeping after a scheduler round.
    ///
    /// First the overflow guard: once every pass in the system sits
    /// above BARRIER, the current minimum is subtracted from every heap
    /// group, every running group and the pool, pulling the floor back
    /// to zero. Then the pass advance: the pool pays for an MLFQ round
    /// (or an idle one), a stride group pays for its own and goes back
    /// into the heap keyed on the new value, represented by a Runnable
    /// sibling if it has one, else a Sleeping one, else not at all.
    pub fn stride_logic(&mut self, picked: Option<usize>) {
        self.renormalize_passes();

        let stride_ran = match picked {
            Some(p) => self.procs[self.main_of(p)].class == SchedClass::Stride,
            None => false,
        };

        if !stride_ran {
            self.mlfq.pass += stride_of(self.mlfq.tickets);
        } else if let Some(p) = picked {
            let main = self.main_of(p);
            if matches!(
                self.procs[p].state,
                ProcState::Runnable | ProcState::Sleeping
            ) {
                self.procs[main].pass += stride_of(self.procs[main].tickets);
                let rep = self.ready_thread(p).or_else(|| self.sleeping_thread(p));
                if let Some(rep) = rep {
                    self.push_heap(rep);
                }
            }
        }
    }

    fn renormalize_passes(&mut self) {
        let mut min = self.mlfq.pass;
        for k in 1..=self.stride.size {
            min = min.min(self.heap_pass(self.stride.heap[k]));
        }
        let mut r = self.stride.run.head();
        while r != NIL {
            min = min.min(self.heap_pass(r));
            r = self.sched_links.next(r);
        }
        if min <= BARRIER {
            return;
        }

        // Subtract once per group, not once per thread on the lists.
        let mut done = [false; NPROC];
        for k in 1..=self.stride.size {
            let main = self.main_of(self.stride.heap[k]);
            if !done[main] {
                done[main] = true;
                self.procs[main].pass -= min;
            }
        }
        let mut r = self.stride.run.head();
        while r != NIL {
            let main = self.main_of(r);
            if !done[main] {
                done[main] = true;
                self.procs[main].pass -= min;
            }
            r = self.sched_links.next(r);
        }
        self.mlfq.pass -= min;
    }

    /// Sum of stride tickets across heap and running groups plus the
    /// pool; the budget invariant says this is always TOTALTICKETS.
    pub fn ticket_total(&self) -> u32 {
        let mut total = self.mlfq.tickets;
        let mut done = [false; NPROC];
        for k in 1..=self.stride.size {
            let main = self.main_of(self.stride.heap[k]);
            if !done[main] {
                done[main] = true;
                total += self.procs[main].tickets;
            }
        }
        let mut r = self.stride.run.head();
        while r != NIL {
            let main = self.main_of(r);
            if !done[main] {
                done[main] = true;
                total += self.procs[main].tickets;
            }
            r = self.sched_links.next(r);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_runnable(t: &mut ProcTable) -> usize {
        let i = t.allocproc().unwrap();
        let pid = t.fresh_pid();
        t.procs[i].pid = pid;
        t.procs[i].state = ProcState::Runnable;
        t.mlfq_enqueue_group(i);
        i
    }

    fn run_on(t: &mut ProcTable, cpu: &mut Cpu, i: usize) {
        t.procs[i].state = ProcState::Running;
        cpu.proc = Some(i);
    }

    fn assert_heap_valid(t: &ProcTable) {
        for k in 2..=t.stride.size {
            assert!(
                t.heap_pass(t.stride.heap[k / 2]) <= t.heap_pass(t.stride.heap[k]),
                "heap order violated at {}",
                k
            );
        }
    }

    #[test]
    fn test_heap_push_pop_orders_by_pass() {
        let mut t = ProcTable::new();
        for pass in [30, 10, 50, 20, 40] {
            let i = t.allocproc().unwrap();
            t.procs[i].pass = pass;
            t.procs[i].class = SchedClass::Stride;
            t.push_heap(i);
            assert_heap_valid(&t);
        }
        assert_eq!(t.min_pass(), 10);

        let mut popped = alloc::vec::Vec::new();
        while t.stride.size > 0 {
            let p = t.pop_heap();
            popped.push(t.procs[p].pass);
            assert_heap_valid(&t);
        }
        assert_eq!(popped, [10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_min_pass_empty_heap_is_maxint() {
        let t = ProcTable::new();
        assert_eq!(t.min_pass(), MAXINT);
    }

    #[test]
    fn test_set_cpu_share_moves_group_to_stride() {
        let mut t = ProcTable::new();
        let a = spawn_runnable(&mut t);
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, a);

        t.set_cpu_share(&cpu, 30).unwrap();

        assert_eq!(t.procs[a].class, SchedClass::Stride);
        assert_eq!(t.procs[a].tickets, 30);
        assert_eq!(t.mlfq.tickets, 70);
        assert_eq!(t.ticket_total(), TOTALTICKETS);
        // Off the MLFQ queue, onto the running list.
        assert!(!t.mlfq.queues[0].iter(&t.sched_links).any(|i| i == a));
        assert!(t.stride.run.iter(&t.sched_links).any(|i| i == a));
    }

    #[test]
    fn test_set_cpu_share_bounds() {
        let mut t = ProcTable::new();
        let a = spawn_runnable(&mut t);
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, a);

        assert_eq!(t.set_cpu_share(&cpu, 0), Err(KernError::BadArg));
        assert_eq!(
            t.set_cpu_share(&cpu, (TOTALTICKETS - RESERVE) as i32 + 1),
            Err(KernError::BadArg)
        );
        // The exact reserve boundary is admissible.
        t.set_cpu_share(&cpu, (TOTALTICKETS - RESERVE) as i32).unwrap();
        assert_eq!(t.mlfq.tickets, RESERVE);
    }

    #[test]
    fn test_set_cpu_share_regrant_is_like_single_grant() {
        let mut t = ProcTable::new();
        let a = spawn_runnable(&mut t);
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, a);

        t.set_cpu_share(&cpu, 10).unwrap();
        t.set_cpu_share(&cpu, 40).unwrap();
        assert_eq!(t.procs[a].tickets, 40);
        assert_eq!(t.mlfq.tickets, 60);
        assert_eq!(t.ticket_total(), TOTALTICKETS);

        // A regrant that would break the reserve leaves things as-is.
        let b = spawn_runnable(&mut t);
        let mut cpu2 = Cpu::new(1);
        run_on(&mut t, &mut cpu2, b);
        assert_eq!(t.set_cpu_share(&cpu2, 61), Err(KernError::BadArg));
        assert_eq!(t.procs[b].class, SchedClass::Mlfq);
        assert_eq!(t.procs[b].tickets, 0);
        assert_eq!(t.ticket_total(), TOTALTICKETS);
    }

    #[test]
    fn test_new_grant_cannot_instantly_dominate() {
        let mut t = ProcTable::new();
        t.mlfq.pass = 500;

        let a = spawn_runnable(&mut t);
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, a);
        t.set_cpu_share(&cpu, 20).unwrap();
        assert_eq!(t.procs[a].pass, 500);

        // A later grant seeds at the heap minimum when that is lower.
        t.procs[a].state = ProcState::Runnable;
        t.stride.run.remove(&mut t.sched_links, a);
        t.procs[a].pass = 450;
        t.push_heap(a);

        let b = spawn_runnable(&mut t);
        let mut cpu2 = Cpu::new(1);
        run_on(&mut t, &mut cpu2, b);
        t.set_cpu_share(&cpu2, 20).unwrap();
        assert_eq!(t.procs[b].pass, 450);
    }

    #[test]
    fn test_stride_logic_advances_pool_for_mlfq_round() {
        let mut t = ProcTable::new();
        let a = spawn_runnable(&mut t);
        t.procs[a].state = ProcState::Runnable;

        let before = t.mlfq.pass;
        t.stride_logic(Some(a));
        assert_eq!(t.mlfq.pass, before + stride_of(t.mlfq.tickets));

        // An idle round also charges the pool.
        let before = t.mlfq.pass;
        t.stride_logic(None);
        assert_eq!(t.mlfq.pass, before + stride_of(t.mlfq.tickets));
    }

    #[test]
    fn test_stride_logic_reinserts_ran_group() {
        let mut t = ProcTable::new();
        let a = spawn_runnable(&mut t);
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, a);
        t.set_cpu_share(&cpu, 50).unwrap();

        // The group yields: off the running list, back to Runnable.
        t.stride.run.remove(&mut t.sched_links, a);
        t.procs[a].state = ProcState::Runnable;

        let before = t.procs[a].pass;
        t.stride_logic(Some(a));
        assert_eq!(t.procs[a].pass, before + stride_of(50));
        assert_eq!(t.stride.size, 1);
        assert_eq!(t.stride.heap[1], a);
    }

    #[test]
    fn test_stride_logic_drops_dead_group() {
        let mut t = ProcTable::new();
        let a = spawn_runnable(&mut t);
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, a);
        t.set_cpu_share(&cpu, 50).unwrap();

        t.stride.run.remove(&mut t.sched_links, a);
        t.procs[a].state = ProcState::Zombie;
        t.stride_logic(Some(a));
        assert_eq!(t.stride.size, 0);
    }

    #[test]
    fn test_renormalization_floors_at_zero() {
        let mut t = ProcTable::new();
        let a = spawn_runnable(&mut t);
        let b = spawn_runnable(&mut t);
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, a);
        t.set_cpu_share(&cpu, 30).unwrap();
        let mut cpu2 = Cpu::new(1);
        run_on(&mut t, &mut cpu2, b);
        t.set_cpu_share(&cpu2, 20).unwrap();

        // Everyone past the barrier: a waits in the heap, b runs.
        t.procs[a].state = ProcState::Runnable;
        t.stride.run.remove(&mut t.sched_links, a);
        t.procs[a].pass = BARRIER + 10;
        t.push_heap(a);
        t.procs[b].pass = BARRIER + 25;
        t.mlfq.pass = BARRIER + 40;

        t.stride_logic(None);

        let floor = t.procs[a]
            .pass
            .min(t.procs[b].pass)
            .min(t.mlfq.pass - stride_of(t.mlfq.tickets));
        assert_eq!(floor, 0);
        assert!(t.procs[a].pass < MAXINT);
        assert!(t.procs[b].pass < MAXINT);
        assert_eq!(t.procs[b].pass, 15);
    }

    #[test]
    fn test_no_renormalization_below_barrier() {
        let mut t = ProcTable::new();
        t.mlfq.pass = BARRIER - 5;
        t.stride_logic(None);
        assert_eq!(t.mlfq.pass, BARRIER - 5 + stride_of(TOTALTICKETS));
    }
}
