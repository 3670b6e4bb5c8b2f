//! Kern subsystem - the process and scheduling core
//!
//! Contains the process table, the hybrid MLFQ/stride scheduler pair,
//! thread groups, sleep/wakeup and the futex primitive, plus the thin
//! models of the collaborators they consume.

pub mod error;
pub mod fs;
pub mod futex;
pub mod list;
pub mod machine;
pub mod mlfq;
pub mod param;
pub mod proc;
pub mod sched;
pub mod stride;
pub mod thread;
pub mod time;
pub mod vm;

pub use error::{KernError, Result};
pub use futex::{futex_wait, futex_wake, FutexWord};
pub use list::{Link, LinkSet, SlotList, NIL};
pub use machine::{Context, Cpu, Machine, NullMachine, SwitchSite, TrapFrame};
pub use mlfq::Mlfq;
pub use proc::{pinit, ptable, Chan, Proc, ProcState, ProcTable, SchedClass};
pub use sched::{forkret, scheduler, timer_tick};
pub use stride::Stride;
pub use time::uptime;
pub use vm::{AddrSpace, SpaceRef};

/// Initialize the kern subsystem
pub fn init() {
    proc::pinit();
    log::info!("kern: process table ready");
}
