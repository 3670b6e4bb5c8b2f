//! Thread Groups
//!
//! Several task slots share one address space, pid and open files; one
//! of them is the main thread and holds the authoritative scheduling
//! fields. The group is a sentinel-less ring through the `group_links`
//! class, so iteration starts at the slot after the caller and ends at
//! the caller itself.
//!
//! Creation, exit and join move threads through the same slot pool as
//! processes; only the resources differ (a thread owns its kernel
//! stack and a user-stack reservation, never the address space or the
//! files).

use alloc::vec::Vec;

use crate::kern::error::{KernError, Result};
use crate::kern::list::NIL;
use crate::kern::machine::{Cpu, Machine};
use crate::kern::param::{NOFILE, PGSIZE, USTACKSIZE, MAGICEXIT};
use crate::kern::proc::{Chan, ProcState, ProcTable, SchedClass};
use crate::kern::vm::pg_round_down;
use crate::types::Tid;

impl ProcTable {
    // ========================================================================
    // Group iteration
    // ========================================================================

    /// Visit every task in `p`'s thread group exactly once, starting
    /// from the slot after `p` and ending at `p` itself. Short-circuits
    /// with the first slot for which `f` returns true.
    pub fn threads_apply<F>(&self, p: usize, mut f: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        let start = self.group_links.next(p);
        let mut itr = start;
        loop {
            let th = itr;
            itr = self.group_links.next(itr);
            if f(th) {
                return Some(th);
            }
            if itr == start {
                return None;
            }
        }
    }

    /// Every member of `p`'s group, in ring order starting after `p`
    pub fn group_members(&self, p: usize) -> Vec<usize> {
        let mut members = Vec::new();
        self.threads_apply(p, |th| {
            members.push(th);
            false
        });
        members
    }

    /// First Runnable member of the group
    pub fn ready_thread(&self, p: usize) -> Option<usize> {
        self.threads_apply(p, |th| self.procs[th].state == ProcState::Runnable)
    }

    /// First Sleeping member of the group
    pub fn sleeping_thread(&self, p: usize) -> Option<usize> {
        self.threads_apply(p, |th| self.procs[th].state == ProcState::Sleeping)
    }

    /// First Runnable or Running member of the group
    pub fn ready_or_running_thread(&self, p: usize) -> Option<usize> {
        self.threads_apply(p, |th| {
            matches!(
                self.procs[th].state,
                ProcState::Runnable | ProcState::Running
            )
        })
    }

    /// First Runnable member other than `p` itself; the direct-handoff
    /// target in `sched`
    pub fn ready_sibling(&self, p: usize) -> Option<usize> {
        self.threads_apply(p, |th| {
            th != p && self.procs[th].state == ProcState::Runnable
        })
    }

    /// Look a thread up by tid within `p`'s group
    pub fn get_thread(&self, p: usize, tid: Tid) -> Option<usize> {
        self.threads_apply(p, |th| self.procs[th].tid == tid)
    }

    // ========================================================================
    // Thread creation
    // ========================================================================

    /// Create a new thread of the caller's group.
    ///
    /// The thread gets a slot and kernel stack from the common pool, a
    /// user stack one page below the last sibling's, the group's files
    /// by reference, and a trap frame aimed at `start_routine` with the
    /// exit sentinel as its return address, so falling off the routine
    /// traps into `thread_exit(0)`.
    pub fn thread_create(
        &mut self,
        cpu: &Cpu,
        m: &mut dyn Machine,
        start_routine: usize,
        arg: usize,
    ) -> Result<Tid> {
        let curth = cpu.current();
        let thmain = self.main_of(curth);
        let thlast = self.group_links.prev(thmain);

        let nth = self.allocproc()?;

        // Reserve the user stack below the youngest sibling's.
        let top = pg_round_down(self.procs[thlast].ustack) - PGSIZE;
        let base = top - USTACKSIZE;
        let space = self.space_of(thmain).clone();
        if space.lock().allocustack(base).is_err() {
            self.free_slot(nth);
            return Err(KernError::OutOfMemory);
        }
        let mut sp = top;
        sp -= 4;
        space.lock().write_word(sp, arg);
        sp -= 4;
        space.lock().write_word(sp, MAGICEXIT);

        let tid = Tid(self.procs[thlast].tid.0 + 1);
        let pid = self.procs[thmain].pid;
        let sz = self.procs[thmain].sz;
        let parent = self.procs[thmain].parent;
        let class = self.procs[thmain].class;
        let privlevel = self.procs[thmain].privlevel;
        let name = self.procs[thmain].name.clone();
        let files: [Option<crate::kern::fs::FileRef>; NOFILE] =
            core::array::from_fn(|fd| self.procs[thmain].ofile[fd].clone());
        let cwd = self.procs[thmain].cwd.clone();
        let mut tf = self.procs[curth].tf;
        tf.eax = 0;
        tf.esp = sp as u32;
        tf.eip = start_routine as u32;

        {
            let p = &mut self.procs[nth];
            p.pid = pid;
            p.space = Some(space);
            p.sz = sz;
            p.parent = parent;
            p.class = class;
            p.privlevel = privlevel;
            p.ustack = base;
            p.tid = tid;
            p.thmain = curth;
            p.tf = tf;
            p.ofile = files;
            p.cwd = cwd;
            p.name = name;
        }
        self.group_links.ring_insert_before(thmain, nth);
        if parent != NIL {
            self.procs[parent].children.push_tail(&mut self.sibling_links, nth);
        }

        self.procs[nth].state = ProcState::Runnable;
        if self.procs[nth].class == SchedClass::Mlfq {
            self.mlfq_enqueue_thread(nth);
        }
        m.invalidate_tlb(curth);

        Ok(tid)
    }

    // ========================================================================
    // Thread exit
    // ========================================================================

    /// Terminate the calling thread. Main threads are refused; they
    /// leave through `exit`.
    ///
    /// File slots are cleared without closing (ownership lies with the
    /// main thread), the exit value is published, the main thread is
    /// woken, and any thread this one created is re-pointed at the true
    /// main so `thmain` chains stay rooted.
    pub fn thread_exit(
        &mut self,
        cpu: &mut Cpu,
        m: &mut dyn Machine,
        retval: usize,
    ) -> Result<()> {
        let curth = cpu.current();
        if self.procs[curth].thmain == curth {
            return Err(KernError::BadArg);
        }

        for fd in 0..NOFILE {
            self.procs[curth].ofile[fd] = None;
        }
        self.procs[curth].cwd = None;

        self.procs[curth].retval = retval;
        let joiner = self.procs[curth].thmain;
        self.wakeup1(Chan::Slot(joiner));

        // Orphaned creations must not point through a zombie.
        let true_main = self.main_of(curth);
        let members = self.group_members(curth);
        for &th in members.iter() {
            if th != curth && self.procs[th].thmain == curth {
                self.procs[th].thmain = true_main;
            }
        }

        match self.procs[curth].class {
            SchedClass::Mlfq => self.mlfq_dequeue_thread(curth),
            SchedClass::Stride => self.stride.run.remove(&mut self.sched_links, curth),
        }
        self.procs[curth].state = ProcState::Zombie;
        self.sched(cpu, m);
        Ok(())
    }

    // ========================================================================
    // Thread join
    // ========================================================================

    /// Wait for a thread of the caller's group to exit and reap it.
    ///
    /// Fails if the tid is not in the group or the caller is killed.
    /// Only the thread's own `thmain` may reap it; anyone else sleeps
    /// until the slot changes hands or disappears.
    pub fn thread_join(&mut self, cpu: &mut Cpu, m: &mut dyn Machine, tid: Tid) -> Result<usize> {
        loop {
            let curth = cpu.current();
            let th = match self.get_thread(curth, tid) {
                Some(th) => th,
                None => {
                    log::trace!(
                        "join fail! pid: {}, tid: {}",
                        self.procs[curth].pid.0,
                        tid.0
                    );
                    return Err(KernError::NotFound);
                }
            };
            if self.procs[curth].killed {
                return Err(KernError::Killed);
            }

            if self.procs[th].state == ProcState::Zombie && self.procs[th].thmain == curth {
                let retval = self.procs[th].retval;
                self.group_links.ring_remove(th);
                let parent = self.procs[th].parent;
                if parent != NIL {
                    self.procs[parent].children.remove(&mut self.sibling_links, th);
                }
                let base = self.procs[th].ustack;
                self.space_of(curth).lock().deallocustack(base);
                self.free_slot(th);
                return Ok(retval);
            }

            self.sleep_on(cpu, m, Chan::Slot(curth));
        }
    }

    // ========================================================================
    // Group termination
    // ========================================================================

    /// Flag every member of `p`'s group killed and make sleepers
    /// Runnable so they can reach their next trap and observe the flag
    pub fn terminate_group(&mut self, p: usize) {
        let members = self.group_members(p);
        for &th in members.iter() {
            self.procs[th].killed = true;
            if self.procs[th].state == ProcState::Sleeping {
                self.wake_slot(th);
            }
        }
    }

    /// A non-main thread takes over as the group's main: it adopts the
    /// image size, files and stride accounting, every member is
    /// re-pointed at it, and the tids are swapped so the usurper
    /// becomes tid 0. The displaced threads are expected to be
    /// terminated by the caller; ordering against concurrent joins is
    /// not guaranteed.
    fn usurp_proc(&mut self, th: usize) {
        let thmain = self.main_of(th);

        let sz = self.procs[thmain].sz;
        let ticks = self.procs[thmain].ticks;
        let files: [Option<crate::kern::fs::FileRef>; NOFILE] =
            core::array::from_fn(|fd| self.procs[thmain].ofile[fd].clone());
        let cwd = self.procs[thmain].cwd.clone();
        {
            let p = &mut self.procs[th];
            p.sz = sz;
            p.ticks = ticks;
            p.ofile = files;
            p.cwd = cwd;
        }
        if self.procs[th].class == SchedClass::Stride {
            let tickets = self.procs[thmain].tickets;
            let pass = self.procs[thmain].pass;
            self.procs[th].tickets = tickets;
            self.procs[th].pass = pass;
            self.procs[thmain].tickets = 0;
        }

        let members = self.group_members(th);
        for &t in members.iter() {
            self.procs[t].thmain = th;
        }
        self.procs[th].thmain = th;

        let old_tid = self.procs[th].tid;
        self.procs[thmain].tid = old_tid;
        self.procs[th].tid = Tid::MAIN;

        // The process's forked children follow the new main.
        let mut kids = self.procs[thmain].children;
        self.procs[thmain].children.init();
        let mut k = kids.head();
        while k != NIL {
            self.procs[k].parent = th;
            k = self.sibling_links.next(k);
        }
        kids.bulk_move_tail(&mut self.procs[th].children, &mut self.sibling_links);
    }

    /// Make the calling thread the sole thread of its process: usurp
    /// the main role if needed, kill every other member, and join them
    /// one by one. Used on exec-like paths and on the way out of exit.
    pub fn monopolize_proc(&mut self, cpu: &mut Cpu, m: &mut dyn Machine) -> Result<()> {
        let p = cpu.current();
        self.wakeup1(Chan::Slot(self.procs[p].thmain));
        if self.procs[p].thmain != p {
            self.usurp_proc(p);
        }
        self.terminate_group(p);
        self.procs[p].killed = false;

        while !self.group_links.ring_is_singleton(p) {
            let th = self.group_links.next(p);
            let tid = self.procs[th].tid;
            self.thread_join(cpu, m, tid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::machine::NullMachine;
    use crate::kern::param::NPROC;

    fn boot() -> (ProcTable, Cpu) {
        let mut t = ProcTable::new();
        let init = t.userinit();
        let mut cpu = Cpu::new(0);
        t.procs[init].state = ProcState::Running;
        cpu.proc = Some(init);
        cpu.pushcli();
        (t, cpu)
    }

    fn make_threads(t: &mut ProcTable, cpu: &Cpu, n: usize) -> Vec<Tid> {
        let mut m = NullMachine;
        (0..n)
            .map(|_| t.thread_create(cpu, &mut m, 0x1000, 0).unwrap())
            .collect()
    }

    #[test]
    fn test_threads_apply_visits_each_once_ending_at_self() {
        let (mut t, cpu) = boot();
        let init = cpu.current();
        make_threads(&mut t, &cpu, 3);

        let mut visited = Vec::new();
        t.threads_apply(init, |th| {
            visited.push(th);
            false
        });
        assert_eq!(visited.len(), 4);
        assert_eq!(*visited.last().unwrap(), init);
        let mut dedup = visited.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), 4);
    }

    #[test]
    fn test_main_of_reaches_fixed_point_through_chains() {
        let (mut t, mut cpu) = boot();
        let init = cpu.current();
        make_threads(&mut t, &cpu, 1);
        let th1 = t.get_thread(init, Tid(1)).unwrap();

        // A thread created by a non-main thread chains through it.
        cpu.proc = Some(th1);
        t.procs[th1].state = ProcState::Running;
        make_threads(&mut t, &cpu, 1);
        let th2 = t.get_thread(th1, Tid(2)).unwrap();

        assert_eq!(t.procs[th2].thmain, th1);
        assert_eq!(t.main_of(th2), init);
        assert_eq!(t.main_of(init), init);
    }

    #[test]
    fn test_thread_create_lays_out_stack_and_frame() {
        let (mut t, cpu) = boot();
        let init = cpu.current();
        t.procs[init].tf.eax = 55;
        let tid = make_threads(&mut t, &cpu, 1)[0];
        assert_eq!(tid, Tid(1));

        let th = t.get_thread(init, tid).unwrap();
        let p = &t.procs[th];
        assert_eq!(p.pid, t.procs[init].pid);
        assert_eq!(p.tf.eip, 0x1000);
        assert_eq!(p.tf.eax, 0);
        assert_eq!(p.state, ProcState::Runnable);
        assert!(t.mlfq.queues[0].iter(&t.sched_links).any(|i| i == th));

        // One page of guard below the last stack, sentinel on top.
        let top = pg_round_down(t.procs[init].ustack) - PGSIZE;
        assert_eq!(p.ustack, top - USTACKSIZE);
        assert_eq!(p.tf.esp as usize, top - 8);
        let space = t.space_of(init).clone();
        let s = space.lock();
        assert_eq!(s.read_word(top - 8), Some(MAGICEXIT));
        assert_eq!(s.read_word(top - 4), Some(0));
    }

    #[test]
    fn test_thread_exit_refuses_main() {
        let (mut t, mut cpu) = boot();
        let mut m = NullMachine;
        assert_eq!(t.thread_exit(&mut cpu, &mut m, 0), Err(KernError::BadArg));
    }

    #[test]
    fn test_thread_exit_and_join_roundtrip() {
        let (mut t, mut cpu) = boot();
        let init = cpu.current();
        let tid = make_threads(&mut t, &cpu, 1)[0];
        let th = t.get_thread(init, tid).unwrap();
        let mut m = NullMachine;

        // Run the thread and let it exit with a value.
        t.procs[th].state = ProcState::Running;
        let mut tcpu = Cpu::new(1);
        tcpu.proc = Some(th);
        tcpu.pushcli();
        t.thread_exit(&mut tcpu, &mut m, 0xAB).unwrap();
        assert_eq!(t.procs[th].state, ProcState::Zombie);
        assert!(t.procs[th].ofile.iter().all(|f| f.is_none()));

        let free_before = t.free_count();
        let retval = t.thread_join(&mut cpu, &mut m, tid).unwrap();
        assert_eq!(retval, 0xAB);
        assert_eq!(t.procs[th].state, ProcState::Unused);
        assert_eq!(t.free_count(), free_before + 1);
        assert!(t.group_links.ring_is_singleton(init));

        // A second join no longer finds the tid.
        assert_eq!(
            t.thread_join(&mut cpu, &mut m, tid),
            Err(KernError::NotFound)
        );
    }

    #[test]
    fn test_join_in_reverse_order_returns_created_tids() {
        let (mut t, mut cpu) = boot();
        let init = cpu.current();
        let tids = make_threads(&mut t, &cpu, 8);
        let mut m = NullMachine;

        // Each thread runs and returns its own tid.
        for &tid in tids.iter() {
            let th = t.get_thread(init, tid).unwrap();
            t.procs[th].state = ProcState::Running;
            let mut tcpu = Cpu::new(1);
            tcpu.proc = Some(th);
            tcpu.pushcli();
            t.thread_exit(&mut tcpu, &mut m, tid.0 as usize).unwrap();
        }

        for &tid in tids.iter().rev() {
            let retval = t.thread_join(&mut cpu, &mut m, tid).unwrap();
            assert_eq!(retval, tid.0 as usize);
        }

        // No thread slot stays allocated after the joins.
        assert_eq!(t.free_count(), NPROC - 1);
        assert!(t.group_links.ring_is_singleton(init));
        assert_eq!(t.space_of(init).lock().ustack_count(), 1);
    }

    #[test]
    fn test_join_fails_when_caller_killed() {
        let (mut t, mut cpu) = boot();
        let init = cpu.current();
        let tid = make_threads(&mut t, &cpu, 1)[0];
        let mut m = NullMachine;

        t.procs[init].killed = true;
        assert_eq!(
            t.thread_join(&mut cpu, &mut m, tid),
            Err(KernError::Killed)
        );
    }

    #[test]
    fn test_terminate_group_wakes_sleepers() {
        let (mut t, cpu) = boot();
        let init = cpu.current();
        let tid = make_threads(&mut t, &cpu, 1)[0];
        let th = t.get_thread(init, tid).unwrap();

        t.mlfq_dequeue_thread(th);
        t.procs[th].state = ProcState::Sleeping;
        t.procs[th].chan = Some(Chan::Slot(th));
        t.sleepq.push_tail(&mut t.sched_links, th);

        t.terminate_group(init);
        assert!(t.procs[init].killed);
        assert!(t.procs[th].killed);
        assert_eq!(t.procs[th].state, ProcState::Runnable);
        assert!(!t.sleepq.iter(&t.sched_links).any(|i| i == th));
    }

    #[test]
    fn test_monopolize_from_sibling_usurps_main() {
        let (mut t, mut cpu) = boot();
        let init = cpu.current();
        let pid = t.procs[init].pid;
        let tid = make_threads(&mut t, &cpu, 1)[0];
        let th = t.get_thread(init, tid).unwrap();
        let mut m = NullMachine;

        // The sibling runs; the old main is already dead.
        t.procs[th].state = ProcState::Running;
        t.procs[init].state = ProcState::Zombie;
        t.mlfq_dequeue_thread(init);
        cpu.proc = Some(th);

        t.monopolize_proc(&mut cpu, &mut m).unwrap();

        assert_eq!(t.procs[th].tid, Tid::MAIN);
        assert_eq!(t.procs[th].thmain, th);
        assert_eq!(t.main_of(th), th);
        assert_eq!(t.procs[th].pid, pid);
        assert!(t.group_links.ring_is_singleton(th));
        assert_eq!(t.procs[init].state, ProcState::Unused);
    }
}
