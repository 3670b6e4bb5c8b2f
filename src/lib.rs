//! Kern_R - the process and scheduling core of a small teaching kernel
//!
//! This crate provides a memory-safe implementation of a hybrid
//! MLFQ/stride scheduler on top of a multi-threaded process model:
//! thread groups sharing one address space, a three-level feedback
//! queue with priority boosting, proportional CPU shares via a stride
//! min-heap, and the blocking primitives built on top (futex, counting
//! semaphore, readers-writer lock).
//!
//! Architecture boot, trap entry and the context-switch assembly are
//! external collaborators; they plug in through [`kern::Machine`].

#![no_std]
#![allow(dead_code)]
// Kernel-appropriate clippy configuration
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Slot indices are compared against queue heads and pins all over
#![allow(clippy::collapsible_if)]

// Standard library replacement for no_std
extern crate alloc;

// Core types
pub mod types;

// Kernel core
pub mod kern;

// System call surface
pub mod syscall;

// User-space side of the blocking primitives
pub mod user;

/// Kernel version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Kernel name
pub const NAME: &str = "Kern_R";

/// Initialize the kernel library
pub fn init() {
    kern::init();
}
