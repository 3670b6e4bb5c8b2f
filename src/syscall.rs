//! System Call Surface
//!
//! The C-shaped boundary of the core: thin wrappers that take the
//! table lock with interrupts pushed off, call into the kernel, and
//! flatten `Result`s to the classic non-negative/-1 convention.
//! Trap dispatch and argument fetching belong to the platform; these
//! are the handlers it lands on.

use crate::kern::error::Result;
use crate::kern::fs::Pio;
use crate::kern::futex::{futex_wait, futex_wake, FutexWord};
use crate::kern::machine::{Cpu, Machine};
use crate::kern::proc::{ptable, Chan};
use crate::kern::time;
use crate::types::{Pid, Tid};

fn flatten(r: Result<i32>) -> i32 {
    match r {
        Ok(v) => v,
        Err(e) => e.as_errno(),
    }
}

/// fork() -> pid | -1
pub fn sys_fork(cpu: &mut Cpu) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = flatten(t.fork(cpu).map(|pid| pid.0 as i32));
    drop(t);
    cpu.popcli();
    r
}

/// exit() does not return once a real machine has switched away
pub fn sys_exit(cpu: &mut Cpu, m: &mut dyn Machine) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    t.exit(cpu, m);
    drop(t);
    cpu.popcli();
    0
}

/// wait() -> pid | -1
pub fn sys_wait(cpu: &mut Cpu, m: &mut dyn Machine) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = flatten(t.wait(cpu, m).map(|pid| pid.0 as i32));
    drop(t);
    cpu.popcli();
    r
}

/// kill(pid) -> 0 | -1
pub fn sys_kill(pid: i32) -> i32 {
    if pid < 0 {
        return -1;
    }
    let mut t = ptable().lock();
    flatten(t.kill(Pid(pid as u32)).map(|_| 0))
}

/// yield() -> 0
pub fn sys_yield(cpu: &mut Cpu, m: &mut dyn Machine) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    t.yield_cpu(cpu, m);
    drop(t);
    cpu.popcli();
    0
}

/// sleep(ticks) -> 0 | -1 when killed while waiting
pub fn sys_sleep(cpu: &mut Cpu, m: &mut dyn Machine, n: u32) -> i32 {
    let start = time::uptime();
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = loop {
        if time::uptime().wrapping_sub(start) >= n as u64 {
            break 0;
        }
        let p = cpu.current();
        if t.procs[p].killed {
            break -1;
        }
        t.sleep_on(cpu, m, Chan::Ticks);
    };
    drop(t);
    cpu.popcli();
    r
}

/// uptime() -> ticks since boot
pub fn sys_uptime() -> i32 {
    time::uptime() as i32
}

/// getpid()
pub fn sys_getpid(cpu: &Cpu) -> i32 {
    let t = ptable().lock();
    t.procs[cpu.current()].pid.0 as i32
}

/// gettid()
pub fn sys_gettid(cpu: &Cpu) -> i32 {
    let t = ptable().lock();
    t.procs[cpu.current()].tid.0 as i32
}

/// getlev() -> the caller's MLFQ level
pub fn sys_getlev(cpu: &Cpu) -> i32 {
    let t = ptable().lock();
    t.level_of(cpu.current()) as i32
}

/// set_cpu_share(pct) -> 0 | -1
pub fn sys_set_cpu_share(cpu: &mut Cpu, share: i32) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = flatten(t.set_cpu_share(cpu, share).map(|_| 0));
    drop(t);
    cpu.popcli();
    r
}

/// thread_create(&tid, start_routine, arg) -> 0 | -1
pub fn sys_thread_create(
    cpu: &mut Cpu,
    m: &mut dyn Machine,
    tid_out: &mut u32,
    start_routine: usize,
    arg: usize,
) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = match t.thread_create(cpu, m, start_routine, arg) {
        Ok(tid) => {
            *tid_out = tid.0;
            0
        }
        Err(e) => e.as_errno(),
    };
    drop(t);
    cpu.popcli();
    r
}

/// thread_exit(retval); refused for the main thread
pub fn sys_thread_exit(cpu: &mut Cpu, m: &mut dyn Machine, retval: usize) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = flatten(t.thread_exit(cpu, m, retval).map(|_| 0));
    drop(t);
    cpu.popcli();
    r
}

/// thread_join(tid, &retval) -> 0 | -1
pub fn sys_thread_join(
    cpu: &mut Cpu,
    m: &mut dyn Machine,
    tid: u32,
    retval_out: &mut usize,
) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = match t.thread_join(cpu, m, Tid(tid)) {
        Ok(retval) => {
            *retval_out = retval;
            0
        }
        Err(e) => e.as_errno(),
    };
    drop(t);
    cpu.popcli();
    r
}

/// futex_wait(addr, tid) -> 0 | -1
pub fn sys_futex_wait(cpu: &mut Cpu, m: &mut dyn Machine, addr: &FutexWord, tid: u32) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = flatten(futex_wait(&mut t, cpu, m, addr, Tid(tid)).map(|_| 0));
    drop(t);
    cpu.popcli();
    r
}

/// futex_wake(addr) -> 0 | -1
pub fn sys_futex_wake(cpu: &mut Cpu, addr: &FutexWord) -> i32 {
    cpu.pushcli();
    let mut t = ptable().lock();
    let r = flatten(futex_wake(&mut t, cpu, addr).map(|_| 0));
    drop(t);
    cpu.popcli();
    r
}

/// pread(fd, buf, n, off) -> bytes | -1; the I/O itself is the
/// positional-I/O collaborator's
pub fn sys_pread(pio: &mut dyn Pio, fd: i32, buf: &mut [u8], off: usize) -> i32 {
    pio.pread(fd, buf, off)
}

/// pwrite(fd, buf, n, off) -> bytes | -1
pub fn sys_pwrite(pio: &mut dyn Pio, fd: i32, buf: &[u8], off: usize) -> i32 {
    pio.pwrite(fd, buf, off)
}
