//! Address Space Model
//!
//! Page tables, copy-on-fork and TLB maintenance are out of scope for
//! the scheduler core; this module carries just enough address-space
//! state for the lifecycle paths to exercise their collaborator calls:
//! a program break for `growproc`, and per-thread user-stack
//! reservations for `thread_create`/`thread_exit`.
//!
//! A group's threads share one space through an `Arc`; all mutation
//! happens behind the inner lock.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::kern::error::{KernError, Result};
use crate::kern::param::{PGSIZE, USTACKSIZE};

/// Lowest address the kernel claims; user allocations stay below it
pub const KERNBASE: usize = 0x8000_0000;

/// A shared handle on an address space
pub type SpaceRef = Arc<Mutex<AddrSpace>>;

/// Round an address down to its page boundary
pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

/// One process's address space
#[derive(Debug)]
pub struct AddrSpace {
    /// Program break (size of the process image)
    pub sz: usize,
    /// Base addresses of the per-thread user stacks
    ustacks: Vec<usize>,
    /// Sparse word store; carries the few stack words the kernel
    /// writes (thread arguments, the exit sentinel)
    words: BTreeMap<usize, usize>,
}

impl AddrSpace {
    /// Set up a fresh kernel-mapped space
    pub fn setupkvm() -> SpaceRef {
        Arc::new(Mutex::new(AddrSpace {
            sz: 0,
            ustacks: Vec::new(),
            words: BTreeMap::new(),
        }))
    }

    /// Load the first process image
    pub fn inituvm(&mut self, sz: usize) {
        self.sz = sz;
    }

    /// Duplicate this space for a forked child
    pub fn copyuvm(&self) -> Result<SpaceRef> {
        Ok(Arc::new(Mutex::new(AddrSpace {
            sz: self.sz,
            ustacks: self.ustacks.clone(),
            words: self.words.clone(),
        })))
    }

    /// Grow the image to `new_sz`; returns the new break
    pub fn allocuvm(&mut self, new_sz: usize) -> Result<usize> {
        if new_sz >= KERNBASE {
            return Err(KernError::OutOfMemory);
        }
        self.sz = new_sz;
        Ok(new_sz)
    }

    /// Shrink the image to `new_sz`; returns the new break
    pub fn deallocuvm(&mut self, new_sz: usize) -> usize {
        if new_sz < self.sz {
            self.sz = new_sz;
        }
        self.sz
    }

    /// Reserve a USTACKSIZE user stack at `base`
    pub fn allocustack(&mut self, base: usize) -> Result<()> {
        if base == 0 || base + USTACKSIZE > KERNBASE {
            return Err(KernError::OutOfMemory);
        }
        // A stack landing on an existing reservation means the address
        // space below the image has been exhausted.
        if self
            .ustacks
            .iter()
            .any(|&b| base < b + USTACKSIZE && b < base + USTACKSIZE)
        {
            return Err(KernError::OutOfMemory);
        }
        self.ustacks.push(base);
        Ok(())
    }

    /// Release the user stack reserved at `base`
    pub fn deallocustack(&mut self, base: usize) {
        self.ustacks.retain(|&b| b != base);
    }

    /// Store a word of user memory
    pub fn write_word(&mut self, addr: usize, val: usize) {
        self.words.insert(addr, val);
    }

    /// Read a word of user memory back
    pub fn read_word(&self, addr: usize) -> Option<usize> {
        self.words.get(&addr).copied()
    }

    /// Whether a stack is reserved at `base`
    pub fn has_ustack(&self, base: usize) -> bool {
        self.ustacks.contains(&base)
    }

    /// Number of reserved user stacks
    pub fn ustack_count(&self) -> usize {
        self.ustacks.len()
    }
}
