//! Portable kernel core library.
//!
//! Everything in this crate is independent of the target architecture and of
//! the live process context, so it builds (and its tests run) on the host.
//! The kernel crate layers the syscall surface on top; arch integration
//! plugs in through the [`memory::vm::page_directory::PageDirectory`] seam.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod fs;
pub mod memory;
pub mod proc;
pub mod sync;
