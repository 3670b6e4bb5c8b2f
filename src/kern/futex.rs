//! Futex - wait on a word, wake by tid
//!
//! The fast path lives entirely in user space (see the semaphore in
//! `user::xem`); the kernel is only entered to park and unpark. A
//! waiter sleeps on its own slot if the word still names its tid when
//! the kernel looks; a waker reads the word and wakes the named thread
//! of its own process. The word itself is guarded by a dedicated
//! interlock so the check-and-sleep cannot race a wake.

use core::sync::atomic::{AtomicI32, Ordering};

use spin::Mutex;

use crate::kern::error::{KernError, Result};
use crate::kern::machine::{Cpu, Machine};
use crate::kern::proc::{Chan, ProcTable};
use crate::types::Tid;

/// A word futexes operate on
pub type FutexWord = AtomicI32;

static FUTEX: Mutex<()> = Mutex::new(());

/// Block the caller while `*addr` still holds its tid.
///
/// Returns without sleeping when the word has already moved on; a word
/// naming some other thread is a caller error.
pub fn futex_wait(
    t: &mut ProcTable,
    cpu: &mut Cpu,
    m: &mut dyn Machine,
    addr: &FutexWord,
    tid: Tid,
) -> Result<()> {
    let guard = FUTEX.lock();
    if addr.load(Ordering::SeqCst) == tid.0 as i32 {
        let p = cpu.current();
        if t.procs[p].tid == tid {
            // The table is already locked by the caller, so the wake
            // side cannot slip in between dropping the interlock and
            // going to sleep.
            drop(guard);
            t.sleep_on(cpu, m, Chan::Slot(p));
            return Ok(());
        }
        return Err(KernError::BadArg);
    }
    Ok(())
}

/// Wake the thread of the calling process whose tid is in `*addr`
pub fn futex_wake(t: &mut ProcTable, cpu: &Cpu, addr: &FutexWord) -> Result<()> {
    let _guard = FUTEX.lock();
    let val = addr.load(Ordering::SeqCst);
    if val < 0 {
        return Err(KernError::NotFound);
    }
    let p = cpu.current();
    match t.get_thread(p, Tid(val as u32)) {
        Some(th) => {
            t.wakeup1(Chan::Slot(th));
            Ok(())
        }
        None => Err(KernError::NotFound),
    }
}
