//! The smew kernel.
//!
//! This crate layers the process-facing syscall surface over the portable
//! core in `libkernel`. The pieces here need a process context: a PID, an
//! address space, a file-descriptor table, per-process accounting. Everything
//! below the [`PageDirectory`] seam stays in `libkernel` and is exercised on
//! the host.
//!
//! [`PageDirectory`]: libkernel::memory::vm::page_directory::PageDirectory

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod memory;
pub mod process;
