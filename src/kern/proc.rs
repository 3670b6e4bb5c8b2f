//! Process Table and Lifecycle
//!
//! A fixed pool of NPROC task slots, preallocated at boot, carries
//! every process and thread in the system. One task per thread group is
//! the *main thread*: the group's pid, privilege level, tick counter
//! and stride tickets are authoritative only on it, and every sibling
//! reaches it by following `thmain` to its fixed point.
//!
//! The whole table - slots, link sets, both schedulers, the sleep and
//! free lists - sits behind a single lock. Methods on [`ProcTable`]
//! assume the caller holds it; the global accessor [`ptable`] hands the
//! lock out.

use alloc::boxed::Box;
use core::array;

use spin::{Mutex, Once};

use crate::kern::error::{KernError, Result};
use crate::kern::fs::{fileclose, filedup, idup, iput, namei, FileRef, InodeRef};
use crate::kern::list::{LinkSet, SlotList, NIL};
use crate::kern::machine::{Context, Cpu, Machine, TrapFrame, FL_IF};
use crate::kern::mlfq::Mlfq;
use crate::kern::param::{KSTACKSIZE, NOFILE, NPROC, PGSIZE};
use crate::kern::stride::Stride;
use crate::kern::vm::{AddrSpace, SpaceRef};
use crate::types::{Pid, Tid};

// ============================================================================
// Task state
// ============================================================================

/// Lifecycle state of a task slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Free slot
    Unused,
    /// Being created
    Embryo,
    /// Ready to run
    Runnable,
    /// On a CPU
    Running,
    /// Blocked on a channel
    Sleeping,
    /// Exited, awaiting reaping
    Zombie,
}

/// Which scheduler owns a thread group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    /// Multi-level feedback queue (the default pool)
    Mlfq,
    /// Proportional-share stride participant
    Stride,
}

/// A sleep channel
///
/// Tasks sleep on their own slot (wait, join, futex) or on the global
/// tick stream. Fork remaps `Slot` channels that point into the parent
/// group onto the matching child slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chan {
    /// The task slot with this index
    Slot(usize),
    /// The timer tick counter
    Ticks,
}

/// A kernel stack page
pub type KStack = Box<[u8; KSTACKSIZE]>;

/// Allocate a zeroed kernel stack
///
/// Returns None when the page allocator is exhausted.
fn kalloc_stack() -> Option<KStack> {
    Some(Box::new([0u8; KSTACKSIZE]))
}

// ============================================================================
// Task slot
// ============================================================================

/// One process-or-thread slot
#[derive(Debug)]
pub struct Proc {
    /// Lifecycle state
    pub state: ProcState,
    /// Process id, shared by the whole thread group
    pub pid: Pid,
    /// Thread id within the group; 0 for the main thread
    pub tid: Tid,
    /// Slot of the group's main thread (self for the main)
    pub thmain: usize,
    /// MLFQ level 0..QSIZE-1; authoritative on the main thread
    pub privlevel: usize,
    /// MLFQ quantum counter; authoritative on the main thread
    pub ticks: u32,
    /// Owning scheduler
    pub class: SchedClass,
    /// Stride share; authoritative on the main thread
    pub tickets: u32,
    /// Cumulative virtual time; authoritative on the main thread
    pub pass: i32,
    /// Sleep channel while Sleeping
    pub chan: Option<Chan>,
    /// Termination flag, observed at the next trap or join
    pub killed: bool,
    /// Parent slot, or NIL
    pub parent: usize,
    /// Children list head (sibling-linked); threads of child groups are
    /// members too and are skipped by `wait` via their nonzero tid
    pub children: SlotList,
    /// Thread exit value
    pub retval: usize,
    /// Task name, for diagnostics
    pub name: heapless::String<16>,
    /// Kernel stack
    pub kstack: Option<KStack>,
    /// Trap frame for the user-mode return path
    pub tf: TrapFrame,
    /// Saved kernel context
    pub context: Context,
    /// Shared address space
    pub space: Option<SpaceRef>,
    /// Size of the process image (per-slot copy, as threads see it)
    pub sz: usize,
    /// Base of this thread's user stack
    pub ustack: usize,
    /// Open files; siblings carry non-owning copies
    pub ofile: [Option<FileRef>; NOFILE],
    /// Current directory
    pub cwd: Option<InodeRef>,
}

impl Proc {
    fn unused(slot: usize) -> Self {
        Proc {
            state: ProcState::Unused,
            pid: Pid::NULL,
            tid: Tid::MAIN,
            thmain: slot,
            privlevel: 0,
            ticks: 0,
            class: SchedClass::Mlfq,
            tickets: 0,
            pass: 0,
            chan: None,
            killed: false,
            parent: NIL,
            children: SlotList::new(),
            retval: 0,
            name: heapless::String::new(),
            kstack: None,
            tf: TrapFrame::default(),
            context: Context::default(),
            space: None,
            sz: 0,
            ustack: 0,
            ofile: array::from_fn(|_| None),
            cwd: None,
        }
    }

    /// Whether this slot holds a live thread (anything but Unused/Zombie
    /// that still participates in scheduling or sleeping)
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            ProcState::Runnable | ProcState::Running | ProcState::Sleeping
        )
    }
}

// ============================================================================
// Process table
// ============================================================================

/// The process table: every slot, every scheduler structure, one lock
#[derive(Debug)]
pub struct ProcTable {
    /// The task slots
    pub procs: [Proc; NPROC],
    /// Link class shared by the MLFQ queues, the stride running list,
    /// the sleep list and the free list (membership is exclusive)
    pub sched_links: LinkSet<NPROC>,
    /// Link class for the thread-group rings
    pub group_links: LinkSet<NPROC>,
    /// Link class for the children/sibling chains
    pub sibling_links: LinkSet<NPROC>,
    /// The feedback-queue scheduler (and the pool's stride accounting)
    pub mlfq: Mlfq,
    /// The stride scheduler
    pub stride: Stride,
    /// Blocked tasks
    pub sleepq: SlotList,
    /// Free slots
    pub freeq: SlotList,
    /// Next process id
    nextpid: u32,
    /// Slot of the init process, or NIL before userinit
    pub initproc: usize,
}

impl ProcTable {
    /// Build the boot-time table: every slot unused and on the free
    /// list, all 100 tickets on the MLFQ pool
    pub fn new() -> Self {
        let mut t = ProcTable {
            procs: array::from_fn(Proc::unused),
            sched_links: LinkSet::new(),
            group_links: LinkSet::new(),
            sibling_links: LinkSet::new(),
            mlfq: Mlfq::new(),
            stride: Stride::new(),
            sleepq: SlotList::new(),
            freeq: SlotList::new(),
            nextpid: 1,
            initproc: NIL,
        };
        for i in 0..NPROC {
            t.group_links.ring_init(i);
            t.freeq.push_tail(&mut t.sched_links, i);
        }
        t
    }

    /// Resolve the main thread of `i`'s group
    ///
    /// `thmain` may chain through a thread that created the caller, so
    /// this follows it to the fixed point rather than hopping once.
    pub fn main_of(&self, mut i: usize) -> usize {
        while self.procs[i].thmain != i {
            i = self.procs[i].thmain;
        }
        i
    }

    /// Fresh pid for a new process (threads inherit the group's)
    pub fn fresh_pid(&mut self) -> Pid {
        let pid = Pid(self.nextpid);
        self.nextpid += 1;
        pid
    }

    /// Free slots remaining
    pub fn free_count(&self) -> usize {
        self.freeq.iter(&self.sched_links).count()
    }

    // ========================================================================
    // Slot allocation
    // ========================================================================

    /// Take a slot off the free list and initialize the state required
    /// to run in the kernel: a kernel stack, and a context that resumes
    /// at `forkret` on its way out to user mode.
    pub fn allocproc(&mut self) -> Result<usize> {
        let i = match self.freeq.first() {
            Some(i) => i,
            None => return Err(KernError::OutOfSlots),
        };
        self.freeq.remove(&mut self.sched_links, i);

        let p = &mut self.procs[i];
        p.state = ProcState::Embryo;
        p.tid = Tid::MAIN;
        p.thmain = i;
        p.class = SchedClass::Mlfq;
        p.privlevel = 0;
        p.ticks = 0;

        match kalloc_stack() {
            Some(k) => p.kstack = Some(k),
            None => {
                p.state = ProcState::Unused;
                self.freeq.push_tail(&mut self.sched_links, i);
                return Err(KernError::OutOfMemory);
            }
        }
        p.context = Context {
            eip: crate::kern::sched::forkret as usize as u32,
            ..Context::default()
        };

        Ok(i)
    }

    /// Clear a slot and return it to the free list
    ///
    /// Resource specifics (address space, user stack) are the caller's
    /// business; this only drops what the slot itself owns.
    pub fn free_slot(&mut self, i: usize) {
        let p = &mut self.procs[i];
        p.kstack = None;
        p.space = None;
        p.pid = Pid::NULL;
        p.tid = Tid::MAIN;
        p.thmain = i;
        p.parent = NIL;
        p.children.init();
        p.name.clear();
        p.killed = false;
        p.tickets = 0;
        p.pass = 0;
        p.ticks = 0;
        p.privlevel = 0;
        p.retval = 0;
        p.chan = None;
        p.sz = 0;
        p.ustack = 0;
        p.cwd = None;
        for fd in p.ofile.iter_mut() {
            *fd = None;
        }
        p.state = ProcState::Unused;
        self.group_links.ring_init(i);
        self.freeq.push_tail(&mut self.sched_links, i);
    }

    /// The group's shared address space
    ///
    /// # Panics
    ///
    /// Panics if the main thread has none; every live group owns one.
    pub fn space_of(&self, i: usize) -> &SpaceRef {
        let main = self.main_of(i);
        match self.procs[main].space.as_ref() {
            Some(s) => s,
            None => panic!("group has no address space"),
        }
    }

    // ========================================================================
    // First process
    // ========================================================================

    /// One-time bootstrap of the first user task at MLFQ level 0
    pub fn userinit(&mut self) -> usize {
        let i = match self.allocproc() {
            Ok(i) => i,
            Err(_) => panic!("userinit: no slots"),
        };
        let pid = self.fresh_pid();
        let space = AddrSpace::setupkvm();
        let ustack = crate::kern::vm::KERNBASE - crate::kern::param::USTACKSIZE;
        {
            let mut s = space.lock();
            s.inituvm(PGSIZE);
            if s.allocustack(ustack).is_err() {
                panic!("userinit: out of memory?");
            }
        }

        let p = &mut self.procs[i];
        p.pid = pid;
        p.space = Some(space);
        p.sz = PGSIZE;
        p.ustack = ustack;
        p.tf = TrapFrame {
            eflags: FL_IF,
            esp: PGSIZE as u32,
            eip: 0, // beginning of the init image
            ..TrapFrame::default()
        };
        let _ = p.name.push_str("initcode");
        p.cwd = Some(namei("/"));

        self.initproc = i;
        self.procs[i].state = ProcState::Runnable;
        self.mlfq_enqueue_group(i);
        i
    }

    // ========================================================================
    // Fork
    // ========================================================================

    /// Create a new process duplicating the caller's whole thread group.
    ///
    /// Every live thread of the caller's group gets a matching slot in
    /// the child: Runnable and Running parents become Runnable children,
    /// Sleeping parents stay Sleeping with self-referential channels
    /// remapped onto the child group. The caller's copy is the child's
    /// entry thread and returns 0 through its trap frame. Any failure
    /// rolls the partial group back.
    pub fn fork(&mut self, cpu: &Cpu) -> Result<Pid> {
        let cur = cpu.current();
        let main = self.main_of(cur);

        // The whole group forks or none of it does.
        let members = self.group_members(main);
        let live: alloc::vec::Vec<usize> = members
            .iter()
            .copied()
            .filter(|&i| self.procs[i].is_live())
            .collect();
        if self.free_count() < live.len() {
            return Err(KernError::OutOfSlots);
        }

        let child_space = self.space_of(main).lock().copyuvm()?;

        // Slot map from parent thread to its clone.
        let mut map = [NIL; NPROC];
        let mut made: alloc::vec::Vec<usize> = alloc::vec::Vec::new();

        for &s in live.iter() {
            let c = match self.allocproc() {
                Ok(c) => c,
                Err(e) => {
                    self.fork_rollback(&made);
                    return Err(e);
                }
            };
            map[s] = c;
            made.push(c);
        }
        let nm = map[main];
        let pid = self.fresh_pid();

        // Child main: a fresh MLFQ process at level 0 owning the space
        // copy and duplicated files.
        let files: [Option<FileRef>; NOFILE] =
            array::from_fn(|fd| self.procs[main].ofile[fd].as_ref().map(filedup));
        let cwd = self.procs[main].cwd.as_ref().map(idup);
        let name = self.procs[main].name.clone();
        let sz = self.procs[main].sz;
        {
            let p = &mut self.procs[nm];
            p.pid = pid;
            p.tid = Tid::MAIN;
            p.thmain = nm;
            p.class = SchedClass::Mlfq;
            p.privlevel = 0;
            p.ticks = 0;
            p.tickets = 0;
            p.pass = 0;
            p.space = Some(child_space.clone());
            p.sz = sz;
            p.ofile = files;
            p.cwd = cwd;
            p.name = name;
            p.parent = main;
        }
        self.procs[main].children.push_tail(&mut self.sibling_links, nm);

        // Clone the siblings: states, stacks and frames carry over; the
        // kernel stack of each thread is relocated by copy.
        for &s in live.iter() {
            let c = map[s];
            let tid = self.procs[s].tid;
            let ustack = self.procs[s].ustack;
            let tf = self.procs[s].tf;
            let ctx = self.procs[s].context;
            let kcopy = self.procs[s].kstack.as_ref().map(|k| Box::new(**k));
            let chan = self.procs[s].chan;
            let state = self.procs[s].state;

            let sibling_files: [Option<FileRef>; NOFILE] =
                array::from_fn(|fd| self.procs[nm].ofile[fd].clone());
            let sibling_cwd = self.procs[nm].cwd.clone();
            let sibling_name = self.procs[nm].name.clone();

            if c != nm {
                let p = &mut self.procs[c];
                p.pid = pid;
                p.tid = tid;
                p.thmain = nm;
                p.class = SchedClass::Mlfq;
                p.privlevel = 0;
                p.ticks = 0;
                p.space = Some(child_space.clone());
                p.sz = sz;
                p.ofile = sibling_files;
                p.cwd = sibling_cwd;
                p.name = sibling_name;
                p.parent = main;
                self.group_links.ring_insert_before(nm, c);
                self.procs[main].children.push_tail(&mut self.sibling_links, c);
            }
            {
                let p = &mut self.procs[c];
                p.ustack = ustack;
                p.tf = tf;
                p.context = ctx;
                if let Some(k) = kcopy {
                    p.kstack = Some(k);
                }
            }

            match state {
                ProcState::Sleeping => {
                    let p = &mut self.procs[c];
                    p.state = ProcState::Sleeping;
                    p.chan = match chan {
                        Some(Chan::Slot(t)) if map[t] != NIL => Some(Chan::Slot(map[t])),
                        other => other,
                    };
                    self.sleepq.push_tail(&mut self.sched_links, c);
                }
                _ => {
                    self.procs[c].state = ProcState::Runnable;
                }
            }
        }

        // The caller's copy is the entry thread and sees fork() == 0.
        let entry = map[cur];
        self.procs[entry].tf.eax = 0;
        self.procs[entry].context = Context {
            eip: crate::kern::sched::forkret as usize as u32,
            ..Context::default()
        };
        self.mlfq_enqueue_group(entry);

        Ok(pid)
    }

    fn fork_rollback(&mut self, made: &[usize]) {
        for &c in made {
            if self.procs[c].state == ProcState::Sleeping {
                self.sleepq.remove(&mut self.sched_links, c);
            }
            self.group_links.ring_remove(c);
            let parent = self.procs[c].parent;
            if parent != NIL {
                self.procs[parent].children.remove(&mut self.sibling_links, c);
            }
            self.free_slot(c);
        }
    }

    // ========================================================================
    // Exit / wait / kill
    // ========================================================================

    /// Exit the current process. The caller first becomes the group's
    /// sole thread (killing and joining every sibling), then releases
    /// files and cwd, hands its children to init, wakes its parent,
    /// leaves its scheduler and turns Zombie. Does not return once a
    /// real machine has switched away.
    pub fn exit(&mut self, cpu: &mut Cpu, m: &mut dyn Machine) {
        let cur = cpu.current();
        if cur == self.initproc {
            panic!("init exiting");
        }

        if self.monopolize_proc(cpu, m).is_err() {
            log::warn!("exit: draining threads of pid {:?} failed", self.procs[cur].pid);
        }

        // Close all open files. Only the surviving main holds owning
        // references at this point.
        for fd in 0..NOFILE {
            if let Some(f) = self.procs[cur].ofile[fd].take() {
                fileclose(f);
            }
        }
        if let Some(ip) = self.procs[cur].cwd.take() {
            iput(ip);
        }

        // Parent might be sleeping in wait().
        let parent = self.procs[cur].parent;
        if parent != NIL {
            self.wakeup1(Chan::Slot(parent));
        }

        // Pass abandoned children to init.
        let init = self.initproc;
        let mut kids = self.procs[cur].children;
        self.procs[cur].children.init();
        let mut zombie_kid = false;
        let mut k = kids.head();
        while k != NIL {
            self.procs[k].parent = init;
            if self.procs[k].state == ProcState::Zombie {
                zombie_kid = true;
            }
            k = self.sibling_links.next(k);
        }
        kids.bulk_move_tail(&mut self.procs[init].children, &mut self.sibling_links);
        if zombie_kid {
            self.wakeup1(Chan::Slot(init));
        }

        // Leave the scheduler structure this group lives on; a stride
        // group's share flows back to the MLFQ pool.
        match self.procs[cur].class {
            SchedClass::Mlfq => self.mlfq_dequeue_group(cur),
            SchedClass::Stride => {
                self.mlfq.tickets += self.procs[cur].tickets;
                self.procs[cur].tickets = 0;
                self.stride.run.remove(&mut self.sched_links, cur);
            }
        }

        self.procs[cur].state = ProcState::Zombie;
        self.sched(cpu, m);
    }

    /// Wait for a child process to exit and reap it.
    ///
    /// Only main threads (tid 0) are reaped here; joinable threads on
    /// the children list belong to `thread_join`. Returns the child's
    /// pid, or an error if the caller is killed or has no children.
    pub fn wait(&mut self, cpu: &mut Cpu, m: &mut dyn Machine) -> Result<Pid> {
        loop {
            let cur = cpu.current();

            let mut c = self.procs[cur].children.head();
            while c != NIL {
                let next = self.sibling_links.next(c);
                if self.procs[c].state == ProcState::Zombie && self.procs[c].tid.is_main() {
                    let pid = self.procs[c].pid;
                    self.procs[cur].children.remove(&mut self.sibling_links, c);
                    self.free_slot(c);
                    return Ok(pid);
                }
                c = next;
            }

            if self.procs[cur].children.is_empty() {
                return Err(KernError::NotFound);
            }
            if self.procs[cur].killed {
                return Err(KernError::Killed);
            }

            // Wait for children to exit (see the wakeup in exit).
            self.sleep_on(cpu, m, Chan::Slot(cur));
        }
    }

    /// Kill the process with the given pid.
    ///
    /// Every thread of the group is flagged; Sleeping threads are made
    /// Runnable so they reach their next trap and observe the flag. A
    /// stride group's sleepers need no queue: the group already sits in
    /// the heap, where a Runnable member makes it eligible again.
    pub fn kill(&mut self, pid: Pid) -> Result<()> {
        let mut found = NIL;
        for i in 0..NPROC {
            if self.procs[i].state != ProcState::Unused && self.procs[i].pid == pid {
                found = i;
                break;
            }
        }
        if found == NIL {
            return Err(KernError::NotFound);
        }

        let members = self.group_members(found);
        for &t in members.iter() {
            self.procs[t].killed = true;
            if self.procs[t].state == ProcState::Sleeping {
                self.wake_slot(t);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Image growth
    // ========================================================================

    /// Grow (or shrink) the current group's memory by n bytes
    pub fn growproc(&mut self, cpu: &Cpu, m: &mut dyn Machine, n: isize) -> Result<()> {
        let cur = cpu.current();
        let space = self.space_of(cur).clone();
        let mut s = space.lock();
        let sz = s.sz;
        let newsz = if n >= 0 {
            s.allocuvm(sz + n as usize)?
        } else {
            s.deallocuvm(sz - (-n) as usize)
        };
        drop(s);
        self.procs[cur].sz = newsz;
        m.switchuvm(cur);
        Ok(())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Log a one-line listing of every used slot (console ^P)
    pub fn procdump(&self) {
        for i in 0..NPROC {
            let p = &self.procs[i];
            if p.state == ProcState::Unused {
                continue;
            }
            let state = match p.state {
                ProcState::Unused => "unused",
                ProcState::Embryo => "embryo",
                ProcState::Sleeping => "sleep ",
                ProcState::Runnable => "runble",
                ProcState::Running => "run   ",
                ProcState::Zombie => "zombie",
            };
            log::info!(
                "{} {} {} {} {}",
                p.pid.0,
                p.tid.0,
                p.privlevel,
                state,
                p.name.as_str()
            );
        }
    }
}

// ============================================================================
// Global table
// ============================================================================

static PTABLE: Once<Mutex<ProcTable>> = Once::new();

/// The process table behind its single lock
pub fn ptable() -> &'static Mutex<ProcTable> {
    PTABLE.call_once(|| Mutex::new(ProcTable::new()));
    PTABLE.get().unwrap()
}

/// Initialize the process table
pub fn pinit() {
    let _ = ptable();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::machine::NullMachine;
    use crate::kern::param::{RESERVE, TOTALTICKETS};

    fn boot() -> ProcTable {
        let mut t = ProcTable::new();
        t.userinit();
        t
    }

    fn run_on(t: &mut ProcTable, cpu: &mut Cpu, i: usize) {
        if t.procs[i].state == ProcState::Runnable {
            t.procs[i].state = ProcState::Running;
        }
        cpu.proc = Some(i);
    }

    #[test]
    fn test_new_table_is_all_free() {
        let t = ProcTable::new();
        assert_eq!(t.free_count(), NPROC);
        assert_eq!(t.mlfq.tickets, TOTALTICKETS);
        assert!(t.mlfq.tickets >= RESERVE);
    }

    #[test]
    fn test_allocproc_takes_and_restores_slots() {
        let mut t = ProcTable::new();
        let a = t.allocproc().unwrap();
        let b = t.allocproc().unwrap();
        assert_ne!(a, b);
        assert_eq!(t.free_count(), NPROC - 2);
        assert_eq!(t.procs[a].state, ProcState::Embryo);
        assert!(t.procs[a].kstack.is_some());

        t.free_slot(a);
        assert_eq!(t.free_count(), NPROC - 1);
        assert_eq!(t.procs[a].state, ProcState::Unused);
        assert!(t.procs[a].kstack.is_none());
    }

    #[test]
    fn test_allocproc_exhaustion() {
        let mut t = ProcTable::new();
        for _ in 0..NPROC {
            t.allocproc().unwrap();
        }
        assert_eq!(t.allocproc(), Err(KernError::OutOfSlots));
    }

    #[test]
    fn test_userinit_enqueues_at_level0() {
        let t = boot();
        let init = t.initproc;
        assert_eq!(t.procs[init].state, ProcState::Runnable);
        assert_eq!(t.procs[init].privlevel, 0);
        assert!(t.mlfq.queues[0].iter(&t.sched_links).any(|i| i == init));
        assert_eq!(t.procs[init].pid, Pid(1));
    }

    #[test]
    fn test_fork_links_child_and_returns_zero_in_tf() {
        let mut t = boot();
        let init = t.initproc;
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, init);
        t.procs[init].tf.eax = 77;

        let pid = t.fork(&cpu).unwrap();
        assert_eq!(pid, Pid(2));

        let child = (0..NPROC).find(|&i| t.procs[i].pid == pid).unwrap();
        assert_eq!(t.procs[child].state, ProcState::Runnable);
        assert_eq!(t.procs[child].tf.eax, 0);
        assert_eq!(t.procs[child].parent, init);
        assert!(t.procs[init]
            .children
            .iter(&t.sibling_links)
            .any(|i| i == child));
        // Child starts over as an MLFQ process at the top level.
        assert_eq!(t.procs[child].class, SchedClass::Mlfq);
        assert_eq!(t.procs[child].privlevel, 0);
        assert!(t.mlfq.queues[0].iter(&t.sched_links).any(|i| i == child));
    }

    #[test]
    fn test_fork_fails_when_table_full() {
        let mut t = boot();
        let init = t.initproc;
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, init);

        while t.free_count() > 0 {
            let i = t.allocproc().unwrap();
            t.procs[i].pid = t.fresh_pid();
        }
        assert_eq!(t.fork(&cpu), Err(KernError::OutOfSlots));
    }

    #[test]
    fn test_wait_reaps_zombie_child() {
        let mut t = boot();
        let init = t.initproc;
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, init);
        let pid = t.fork(&cpu).unwrap();
        let child = (0..NPROC).find(|&i| t.procs[i].pid == pid).unwrap();

        // Run the child to completion by hand.
        let mut ccpu = Cpu::new(1);
        t.procs[child].state = ProcState::Running;
        ccpu.proc = Some(child);
        ccpu.pushcli();
        let mut m = NullMachine;
        t.exit(&mut ccpu, &mut m);
        assert_eq!(t.procs[child].state, ProcState::Zombie);

        let free_before = t.free_count();
        let reaped = t.wait(&mut cpu, &mut m).unwrap();
        assert_eq!(reaped, pid);
        assert_eq!(t.procs[child].state, ProcState::Unused);
        assert_eq!(t.free_count(), free_before + 1);
        assert!(t.procs[init].children.is_empty());
    }

    #[test]
    fn test_wait_without_children_fails() {
        let mut t = boot();
        let init = t.initproc;
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, init);
        let mut m = NullMachine;
        assert_eq!(t.wait(&mut cpu, &mut m), Err(KernError::NotFound));
    }

    #[test]
    fn test_kill_flags_group_and_wakes_sleepers() {
        let mut t = boot();
        let init = t.initproc;
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, init);
        let pid = t.fork(&cpu).unwrap();
        let child = (0..NPROC).find(|&i| t.procs[i].pid == pid).unwrap();

        // Put the child to sleep by hand.
        t.mlfq_dequeue_group(child);
        t.procs[child].state = ProcState::Sleeping;
        t.procs[child].chan = Some(Chan::Slot(child));
        t.sleepq.push_tail(&mut t.sched_links, child);

        assert!(t.kill(pid).is_ok());
        assert!(t.procs[child].killed);
        assert_eq!(t.procs[child].state, ProcState::Runnable);
        assert!(!t.sleepq.iter(&t.sched_links).any(|i| i == child));
        assert!(t.mlfq.queues[0].iter(&t.sched_links).any(|i| i == child));

        assert_eq!(t.kill(Pid(999)), Err(KernError::NotFound));
    }

    #[test]
    fn test_growproc_updates_size() {
        let mut t = boot();
        let init = t.initproc;
        let mut cpu = Cpu::new(0);
        run_on(&mut t, &mut cpu, init);
        let mut m = NullMachine;

        t.growproc(&cpu, &mut m, PGSIZE as isize).unwrap();
        assert_eq!(t.procs[init].sz, 2 * PGSIZE);
        t.growproc(&cpu, &mut m, -(PGSIZE as isize)).unwrap();
        assert_eq!(t.procs[init].sz, PGSIZE);
    }
}
