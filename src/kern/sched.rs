//! Scheduler Core
//!
//! Each CPU loops picking the next runnable task: the stride heap's
//! minimum pass is compared against the MLFQ pool's pass, strictly
//! less wins the round, and the loser's side is charged afterwards.
//! A task that comes off the CPU passes back through `mlfq_logic` /
//! `stride_logic` for demotion, boost, pass advance and heap
//! re-insertion.
//!
//! `sched` is the only way off the CPU for a task: it either hands off
//! directly to a ready sibling (while the group is inside its DTQ
//! micro-quantum) or switches back to the per-CPU scheduler context.
//! Sleep and wakeup are race-free because both sides run under the
//! table lock.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::kern::list::NIL;
use crate::kern::machine::{Cpu, Machine, SwitchSite};
use crate::kern::param::DTQ;
use crate::kern::proc::{Chan, ProcState, ProcTable, SchedClass};
use crate::kern::time;

impl ProcTable {
    // ========================================================================
    // Selection and dispatch
    // ========================================================================

    /// Choose the next task: the stride heap wins the round only with
    /// a pass strictly below the pool's, ties go to the MLFQ. A stride
    /// winner is popped from the heap here.
    pub fn pick_next(&mut self) -> Option<usize> {
        if self.min_pass() < self.mlfq.pass {
            Some(self.pop_heap())
        } else {
            self.mlfq_select()
        }
    }

    /// Put the picked task on this CPU and switch to it; returns
    /// whether a switch happened. Control comes back here once the
    /// task re-enters the scheduler. A popped stride entry may be
    /// Sleeping, in which case it does not run this round (its group
    /// is still charged in `stride_logic`).
    pub fn dispatch(&mut self, cpu: &mut Cpu, m: &mut dyn Machine, picked: Option<usize>) -> bool {
        let p = match picked {
            Some(p) => p,
            None => return false,
        };
        if self.procs[p].state != ProcState::Runnable {
            return false;
        }

        if self.procs[self.main_of(p)].class == SchedClass::Stride {
            self.stride.run.push_tail(&mut self.sched_links, p);
        }
        cpu.proc = Some(p);
        m.switchuvm(p);
        self.procs[p].state = ProcState::Running;

        m.swtch(SwitchSite::Scheduler(cpu.id), SwitchSite::Task(p));

        m.switchkvm();
        true
    }

    /// Post-return bookkeeping for one scheduler round
    pub fn account(&mut self, cpu: &mut Cpu, picked: Option<usize>, ran: bool) {
        if ran {
            if let Some(p) = picked {
                if self.procs[self.main_of(p)].class == SchedClass::Mlfq {
                    self.mlfq_logic(p);
                }
            }
            cpu.proc = None;
        }
        self.stride_logic(picked);
    }

    /// One full scheduler iteration: select, run, account
    pub fn schedule_round(&mut self, cpu: &mut Cpu, m: &mut dyn Machine) {
        let picked = self.pick_next();
        let ran = self.dispatch(cpu, m, picked);
        self.account(cpu, picked, ran);
    }

    // ========================================================================
    // Leaving the CPU
    // ========================================================================

    /// Enter the scheduler from a task that has already changed its
    /// state. While the group still has micro-quantum left and another
    /// sibling is ready, the CPU is handed directly to that sibling
    /// without a full scheduler pass.
    ///
    /// # Panics
    ///
    /// The caller must hold the table lock (guaranteed by holding
    /// `&mut ProcTable`) at exactly one cli level, with interrupts off
    /// and the task no longer Running; anything else is a lost
    /// invariant.
    pub fn sched(&mut self, cpu: &mut Cpu, m: &mut dyn Machine) {
        let p = cpu.current();
        if cpu.ncli != 1 {
            panic!("sched locks");
        }
        if self.procs[p].state == ProcState::Running {
            panic!("sched running");
        }
        if cpu.int_on {
            panic!("sched interruptible");
        }
        let intena = cpu.intena;

        let main = self.main_of(p);
        let handoff = if self.procs[main].ticks % DTQ == 0 {
            None
        } else {
            self.ready_sibling(p)
        };

        match handoff {
            Some(next) => {
                if self.procs[main].class == SchedClass::Stride {
                    self.stride.run.push_tail(&mut self.sched_links, next);
                }
                cpu.proc = Some(next);
                self.procs[next].state = ProcState::Running;
                m.vswitchuvm(next);
                m.swtch(SwitchSite::Task(p), SwitchSite::Task(next));
            }
            None => {
                m.swtch(SwitchSite::Task(p), SwitchSite::Scheduler(cpu.id));
            }
        }

        cpu.intena = intena;
    }

    /// Give up the CPU for one scheduling round, charging the tick the
    /// group just consumed
    pub fn yield_cpu(&mut self, cpu: &mut Cpu, m: &mut dyn Machine) {
        let p = cpu.current();
        let main = self.main_of(p);

        self.procs[main].ticks += 1;
        match self.procs[main].class {
            SchedClass::Mlfq => {
                self.mlfq.ticks += 1;
            }
            SchedClass::Stride => {
                self.stride.run.remove(&mut self.sched_links, p);
            }
        }

        self.procs[p].state = ProcState::Runnable;
        self.sched(cpu, m);
    }

    // ========================================================================
    // Sleep and wakeup
    // ========================================================================

    /// Block the current task on `chan` and schedule away. The caller
    /// already holds the table lock, which is what makes the
    /// sleep/wakeup handshake race-free; any outer lock must be
    /// dropped by the caller after this function has the table locked.
    pub fn sleep_on(&mut self, cpu: &mut Cpu, m: &mut dyn Machine, chan: Chan) {
        let p = cpu.current();
        self.procs[p].chan = Some(chan);

        match self.procs[self.main_of(p)].class {
            SchedClass::Mlfq => self.mlfq_dequeue_thread(p),
            SchedClass::Stride => self.stride.run.remove(&mut self.sched_links, p),
        }
        self.procs[p].state = ProcState::Sleeping;
        self.sleepq.push_tail(&mut self.sched_links, p);

        self.sched(cpu, m);
    }

    /// Make a sleeping task runnable again: off the sleep list, channel
    /// cleared, and back on its level's queue if the MLFQ owns it. A
    /// stride group needs no queue entry; it is reachable through the
    /// heap.
    pub(crate) fn wake_slot(&mut self, i: usize) {
        self.sleepq.remove(&mut self.sched_links, i);
        self.procs[i].chan = None;
        self.procs[i].state = ProcState::Runnable;
        if self.procs[self.main_of(i)].class == SchedClass::Mlfq {
            self.mlfq_enqueue_thread(i);
        }
    }

    /// Wake every task sleeping on `chan`. The table lock must be held.
    pub fn wakeup1(&mut self, chan: Chan) {
        let mut i = self.sleepq.head();
        while i != NIL {
            let next = self.sched_links.next(i);
            if self.procs[i].chan == Some(chan) {
                self.wake_slot(i);
            }
            i = next;
        }
    }
}

// ============================================================================
// Timer entry
// ============================================================================

/// Timer-interrupt work: advance the global clock and wake `sleep(n)`
/// callers parked on the tick stream
pub fn timer_tick(table: &mut ProcTable) {
    time::tick();
    table.wakeup1(Chan::Ticks);
}

// ============================================================================
// First return and the CPU loop
// ============================================================================

static FIRST: AtomicBool = AtomicBool::new(true);

/// A new task's first scheduling lands here on its way out to user
/// mode. Some initialization must run in the context of a regular
/// task (it may sleep), so it cannot run at boot.
pub fn forkret() {
    if FIRST.swap(false, Ordering::SeqCst) {
        log::debug!("forkret: first task up");
    }
}

/// Per-CPU scheduler loop. Never returns: each iteration enables
/// interrupts briefly, takes the table lock and runs one round.
pub fn scheduler(table: &'static Mutex<ProcTable>, cpu: &mut Cpu, m: &mut dyn Machine) -> ! {
    loop {
        cpu.int_on = true;
        cpu.pushcli();
        let mut t = table.lock();
        t.schedule_round(cpu, m);
        drop(t);
        cpu.popcli();
    }
}
