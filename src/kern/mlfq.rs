//! Multi-Level Feedback Queue
//!
//! Three FIFO run queues indexed by privilege level 0 (highest) to
//! QSIZE-1 (lowest). Each level keeps a *pin*: a cursor at the next
//! task to consider, preserving round-robin position across queue
//! mutations; NIL means "start over from the head". Thread groups pack
//! contiguously within a queue so intra-group dispatch and pin
//! rotation stay cheap.
//!
//! The structure also carries the MLFQ pool's side of the stride
//! bargain: the pool is a virtual stride participant with its own
//! tickets and pass.

use crate::kern::list::{SlotList, NIL};
use crate::kern::param::{ta, tq, BOOSTPERIOD, QSIZE, TOTALTICKETS};
use crate::kern::proc::{ProcState, ProcTable};

// ============================================================================
// The queue structure
// ============================================================================

/// The feedback-queue scheduler state
#[derive(Debug)]
pub struct Mlfq {
    /// Tickets held by the MLFQ pool (stride accounting)
    pub tickets: u32,
    /// The pool's cumulative virtual time (stride accounting)
    pub pass: i32,
    /// MLFQ ticks recorded since the last priority boost
    pub ticks: u64,
    /// Per-level run queues; Running tasks stay queued
    pub queues: [SlotList; QSIZE],
    /// Per-level round-robin cursors; NIL = head sentinel
    pub pins: [usize; QSIZE],
}

impl Mlfq {
    /// Boot state: all tickets on the pool, every queue empty
    pub fn new() -> Self {
        Self {
            tickets: TOTALTICKETS,
            pass: 0,
            ticks: 0,
            queues: [SlotList::new(); QSIZE],
            pins: [NIL; QSIZE],
        }
    }
}

// ============================================================================
// Queue operations on the table
// ============================================================================

impl ProcTable {
    /// Whether two slots belong to one thread group
    pub fn same_group(&self, a: usize, b: usize) -> bool {
        self.main_of(a) == self.main_of(b)
    }

    /// The MLFQ level a task schedules at (authoritative on its main)
    pub fn level_of(&self, i: usize) -> usize {
        self.procs[self.main_of(i)].privlevel
    }

    /// Enqueue a single thread at its group's level, packing it next to
    /// a queued sibling when the group is already present.
    pub fn mlfq_enqueue_thread(&mut self, i: usize) {
        let level = self.level_of(i);
        let anchor = {
            let mut found = NIL;
            for q in self.mlfq.queues[level].iter(&self.sched_links) {
                if q != i && self.same_group(q, i) {
                    found = q;
                    break;
                }
            }
            found
        };
        let was_empty = self.mlfq.queues[level].is_empty();
        if anchor != NIL {
            self.mlfq.queues[level].insert_after(&mut self.sched_links, anchor, i);
        } else {
            self.mlfq.queues[level].push_tail(&mut self.sched_links, i);
        }
        if was_empty {
            self.mlfq.pins[level] = i;
        }
    }

    /// Enqueue a whole group: the anchor task goes to the tail of its
    /// level's queue and every other Runnable/Running sibling is packed
    /// immediately after it, in group-ring order.
    pub fn mlfq_enqueue_group(&mut self, anchor: usize) {
        let level = self.level_of(anchor);
        let was_empty = self.mlfq.queues[level].is_empty();
        self.mlfq.queues[level].push_tail(&mut self.sched_links, anchor);
        if was_empty {
            self.mlfq.pins[level] = anchor;
        }

        let members = self.group_members(anchor);
        let mut prev = anchor;
        for &s in members.iter() {
            if s == anchor {
                continue;
            }
            if matches!(
                self.procs[s].state,
                ProcState::Runnable | ProcState::Running
            ) {
                self.mlfq.queues[level].insert_after(&mut self.sched_links, prev, s);
                prev = s;
            }
        }
    }

    /// Dequeue a single thread, moving the level pin off it first
    pub fn mlfq_dequeue_thread(&mut self, i: usize) {
        let level = self.level_of(i);
        if self.mlfq.pins[level] == i {
            let next = self.sched_links.next(i);
            self.mlfq.pins[level] = if next != NIL {
                next
            } else if !self.mlfq.queues[level].is_first(i) {
                self.mlfq.queues[level].head()
            } else {
                NIL
            };
        }
        self.mlfq.queues[level].remove(&mut self.sched_links, i);
    }

    /// Dequeue a whole group: advance the pin past the group, then
    /// unlink every Runnable/Running member from the level's queue.
    pub fn mlfq_dequeue_group(&mut self, p: usize) {
        let level = self.level_of(p);

        let pin = self.mlfq.pins[level];
        if pin != NIL && self.same_group(pin, p) {
            let mut i = self.sched_links.next(pin);
            while i != NIL && self.same_group(i, p) {
                i = self.sched_links.next(i);
            }
            self.mlfq.pins[level] = i; // NIL = start over from the head
        }

        let members = self.group_members(p);
        for &s in members.iter() {
            if matches!(
                self.procs[s].state,
                ProcState::Runnable | ProcState::Running
            ) {
                self.mlfq.queues[level].remove(&mut self.sched_links, s);
            }
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Pick the next Runnable MLFQ task: highest non-empty level wins,
    /// round-robin within a level starting at the pin. Tasks Running on
    /// another CPU are skipped in the scan. The pin is left on the
    /// chosen task.
    pub fn mlfq_select(&mut self) -> Option<usize> {
        for level in 0..QSIZE {
            let pin = self.mlfq.pins[level];
            let start = if pin != NIL {
                pin
            } else {
                self.mlfq.queues[level].head()
            };

            let mut i = start;
            while i != NIL {
                if self.procs[i].state == ProcState::Runnable {
                    self.mlfq.pins[level] = i;
                    return Some(i);
                }
                i = self.sched_links.next(i);
            }
            if pin != NIL {
                let mut i = self.mlfq.queues[level].head();
                while i != NIL && i != pin {
                    if self.procs[i].state == ProcState::Runnable {
                        self.mlfq.pins[level] = i;
                        return Some(i);
                    }
                    i = self.sched_links.next(i);
                }
            }
        }
        None
    }

    // ========================================================================
    // On-return accounting
    // ========================================================================

    /// Queue bookkeeping for a task that just came back from the CPU.
    ///
    /// The tick itself was charged on the way in (`yield_cpu`); this
    /// acts on the counters. A Runnable group that has used its
    /// allotment moves one level down (queues and all); on a quantum
    /// boundary the pin rotates to the next group, otherwise to the
    /// next sibling of the same group. A Sleeping group still pays its
    /// allotment, but owns no queue entries to move.
    pub fn mlfq_logic(&mut self, p: usize) {
        let main = self.main_of(p);
        let bottom = QSIZE - 1;

        match self.procs[p].state {
            ProcState::Runnable => {
                let level = self.procs[main].privlevel;
                let ticks = self.procs[main].ticks;
                if level < bottom && ticks >= ta(level) {
                    self.mlfq_dequeue_group(p);
                    self.procs[main].privlevel = level + 1;
                    self.procs[main].ticks = 0;
                    self.mlfq_enqueue_group(p);
                } else if ticks % tq(level) == 0 {
                    self.rotate_pin_to_next_group(p);
                } else {
                    self.rotate_pin_within_group(p);
                }
            }
            ProcState::Sleeping => {
                let level = self.procs[main].privlevel;
                if level < bottom && self.procs[main].ticks >= ta(level) {
                    self.procs[main].privlevel = level + 1;
                    self.procs[main].ticks = 0;
                }
            }
            ProcState::Zombie => {}
            _ => panic!("mlfq wrong state"),
        }

        if self.mlfq.ticks >= BOOSTPERIOD {
            self.priority_boost();
        }
    }

    fn rotate_pin_to_next_group(&mut self, p: usize) {
        let level = self.level_of(p);
        let mut i = self.sched_links.next(p);
        while i != NIL && self.same_group(i, p) {
            i = self.sched_links.next(i);
        }
        if i == NIL {
            let mut j = self.mlfq.queues[level].head();
            while j != NIL && self.same_group(j, p) {
                j = self.sched_links.next(j);
            }
            i = if j != NIL {
                j
            } else {
                self.mlfq.queues[level].head()
            };
        }
        self.mlfq.pins[level] = i;
    }

    fn rotate_pin_within_group(&mut self, p: usize) {
        let level = self.level_of(p);
        let next = self.sched_links.next(p);
        if next != NIL && self.same_group(next, p) {
            self.mlfq.pins[level] = next;
        } else {
            // Wrap to the group's first queued member.
            let mut i = self.mlfq.queues[level].head();
            while i != NIL && !self.same_group(i, p) {
                i = self.sched_links.next(i);
            }
            self.mlfq.pins[level] = if i != NIL { i } else { p };
        }
    }

    // ========================================================================
    // Priority boost
    // ========================================================================

    /// Reset every task at the lower levels back to level 0.
    ///
    /// The level-1 and level-2 queues are spliced onto the tail of
    /// level 0 in order; if level 0 was empty it inherits the source
    /// queue's pin, so the boosted tasks are considered next. Sleepers
    /// are reset where they lie.
    pub fn priority_boost(&mut self) {
        for level in 1..QSIZE {
            let mut i = self.mlfq.queues[level].head();
            while i != NIL {
                self.procs[i].privlevel = 0;
                self.procs[i].ticks = 0;
                i = self.sched_links.next(i);
            }

            let dst_empty = self.mlfq.queues[0].is_empty();
            let src_pin = self.mlfq.pins[level];
            let mut src = self.mlfq.queues[level];
            let mut dst = self.mlfq.queues[0];
            src.bulk_move_tail(&mut dst, &mut self.sched_links);
            self.mlfq.queues[level] = src;
            self.mlfq.queues[0] = dst;
            if dst_empty {
                self.mlfq.pins[0] = src_pin;
            }
            self.mlfq.pins[level] = NIL;
        }

        let mut i = self.sleepq.head();
        while i != NIL {
            self.procs[i].privlevel = 0;
            self.procs[i].ticks = 0;
            i = self.sched_links.next(i);
        }

        self.mlfq.ticks = 0;
    }
}
