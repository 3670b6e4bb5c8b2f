//! Machine Interface - CPU state and the context-switch seam
//!
//! Low-level context switching, address-space installation and TLB
//! maintenance are external collaborators. The scheduler core drives
//! them through the [`Machine`] trait; [`NullMachine`] is the hosted
//! loopback used by unit tests, where "switching" is a decision the
//! tests observe rather than a register operation.

use crate::kern::list::NIL;

/// Interrupt-enable bit of the flags register
pub const FL_IF: u32 = 0x200;

// ============================================================================
// Register state
// ============================================================================

/// Callee-saved registers captured across a kernel context switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub ebp: u32,
    pub eip: u32,
}

/// Register state built at kernel entry and consumed by trap return
///
/// A new thread's entry point and initial user stack are installed here;
/// a forked child reports 0 through `eax`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub trapno: u32,
    pub err: u32,
    pub eip: u32,
    pub esp: u32,
    pub eflags: u32,
}

// ============================================================================
// Per-CPU state
// ============================================================================

/// Per-CPU scheduler state
///
/// `ncli` and `intena` model the interrupt-disable nesting the table
/// lock relies on: interrupts must stay off for as long as any level of
/// `pushcli` is outstanding, and the outermost `popcli` restores the
/// state captured on entry.
#[derive(Debug)]
pub struct Cpu {
    /// CPU identity
    pub id: usize,
    /// Slot of the task running on this CPU, if any
    pub proc: Option<usize>,
    /// Context of this CPU's scheduler loop
    pub scheduler: Context,
    /// Depth of pushcli nesting
    pub ncli: u32,
    /// Were interrupts enabled before the outermost pushcli?
    pub intena: bool,
    /// Modeled interrupt-enable flag
    pub int_on: bool,
}

impl Cpu {
    /// Create a CPU with interrupts enabled and nothing running
    pub fn new(id: usize) -> Self {
        Self {
            id,
            proc: None,
            scheduler: Context::default(),
            ncli: 0,
            intena: false,
            int_on: true,
        }
    }

    /// Disable interrupts, tracking nesting depth
    pub fn pushcli(&mut self) {
        if self.ncli == 0 {
            self.intena = self.int_on;
        }
        self.int_on = false;
        self.ncli += 1;
    }

    /// Undo one pushcli; the outermost restores the saved flag
    ///
    /// # Panics
    ///
    /// Panics on underflow or if interrupts are somehow enabled while
    /// nesting is outstanding.
    pub fn popcli(&mut self) {
        if self.int_on {
            panic!("popcli - interruptible");
        }
        if self.ncli == 0 {
            panic!("popcli");
        }
        self.ncli -= 1;
        if self.ncli == 0 && self.intena {
            self.int_on = true;
        }
    }

    /// Slot of the running task
    ///
    /// # Panics
    ///
    /// Panics if the CPU is idle; callers on syscall paths always have
    /// a current task.
    pub fn current(&self) -> usize {
        match self.proc {
            Some(p) => p,
            None => panic!("no current task"),
        }
    }
}

// ============================================================================
// The collaborator seam
// ============================================================================

/// One side of a context switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchSite {
    /// A CPU's scheduler loop
    Scheduler(usize),
    /// A task slot
    Task(usize),
}

impl SwitchSite {
    /// The task slot named by this site, or NIL
    pub fn slot(&self) -> usize {
        match *self {
            SwitchSite::Task(i) => i,
            SwitchSite::Scheduler(_) => NIL,
        }
    }
}

/// Low-level operations the scheduler core consumes
pub trait Machine {
    /// Save the outgoing context and resume the incoming one
    fn swtch(&mut self, from: SwitchSite, to: SwitchSite);

    /// Install a task's address space and kernel stack
    fn switchuvm(&mut self, slot: usize);

    /// Switch kernel stacks between siblings sharing an address space
    fn vswitchuvm(&mut self, slot: usize);

    /// Return to the kernel page table
    fn switchkvm(&mut self);

    /// Drop stale user translations after a thread-stack change
    fn invalidate_tlb(&mut self, slot: usize);
}

/// Hosted loopback backend
///
/// Every operation is a no-op; the scheduler's decisions are observed
/// through the table state instead of a real switch.
pub struct NullMachine;

impl Machine for NullMachine {
    fn swtch(&mut self, _from: SwitchSite, _to: SwitchSite) {}
    fn switchuvm(&mut self, _slot: usize) {}
    fn vswitchuvm(&mut self, _slot: usize) {}
    fn switchkvm(&mut self) {}
    fn invalidate_tlb(&mut self, _slot: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pushcli_popcli_nesting() {
        let mut cpu = Cpu::new(0);
        assert!(cpu.int_on);

        cpu.pushcli();
        cpu.pushcli();
        assert!(!cpu.int_on);
        assert_eq!(cpu.ncli, 2);

        cpu.popcli();
        assert!(!cpu.int_on);
        cpu.popcli();
        assert!(cpu.int_on);
    }

    #[test]
    fn test_pushcli_remembers_disabled_state() {
        let mut cpu = Cpu::new(0);
        cpu.int_on = false;
        cpu.pushcli();
        cpu.popcli();
        assert!(!cpu.int_on);
    }

    #[test]
    #[should_panic(expected = "popcli")]
    fn test_popcli_underflow_panics() {
        let mut cpu = Cpu::new(0);
        cpu.int_on = false;
        cpu.popcli();
    }

    #[test]
    fn test_switch_site_slot() {
        assert_eq!(SwitchSite::Task(3).slot(), 3);
        assert_eq!(SwitchSite::Scheduler(0).slot(), NIL);
    }
}
