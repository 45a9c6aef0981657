//! mmap-family syscalls.
//!
//! `mmap` builds a backing object (anonymous, or the whole of an fd's
//! inode), places it, and charges the process. `munmap` and `mprotect`
//! operate on whole regions only: the caller must name the exact start and
//! length of an existing mapping, and anything else misses. Splitting a
//! region to unmap or protect part of it is not implemented.

use libkernel::error::{KernelError, Result};
use libkernel::memory::address::{TUA, UA, VA};
use libkernel::memory::region::VirtualRange;
use libkernel::memory::vm::object::{VMObject, VMProt};
use libkernel::memory::vm::page_directory::PageDirectory;
use libkernel::memory::{PAGE_MASK, page_align_up};
use log::warn;

use super::uaccess::{self, UserCopyable};
use crate::process::Process;
use crate::process::fd_table::Fd;

pub const PROT_READ: i32 = 0x1;
pub const PROT_WRITE: i32 = 0x2;
pub const PROT_EXEC: i32 = 0x4;

pub const MAP_SHARED: i32 = 0x1;
pub const MAP_PRIVATE: i32 = 0x2;
pub const MAP_FIXED: i32 = 0x10;
pub const MAP_ANONYMOUS: i32 = 0x20;

/// Argument record for `mmap`, read from user space. Field order is ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MmapArgs {
    pub addr: usize,
    pub length: usize,
    pub prot: i32,
    pub flags: i32,
    pub fd: i32,
    pub offset: usize,
}

// SAFETY: #[repr(C)] plain data, valid for any bit pattern.
unsafe impl UserCopyable for MmapArgs {}

fn prot_from_flags(prot: i32) -> VMProt {
    VMProt {
        read: prot & PROT_READ != 0,
        write: prot & PROT_WRITE != 0,
        execute: prot & PROT_EXEC != 0,
        cow: false,
    }
}

impl<PD: PageDirectory> Process<PD> {
    /// Maps a new region, returning its start address.
    pub fn sys_mmap(&self, args: TUA<MmapArgs>) -> Result<usize> {
        let args = uaccess::copy_from_user(args)?;
        if args.length == 0 {
            return Err(KernelError::InvalidValue);
        }
        let length = page_align_up(args.length);
        let prot = prot_from_flags(args.prot);

        let mut mem = self.mem.lock();

        let object = if args.flags & MAP_ANONYMOUS != 0 {
            VMObject::new_anonymous(length)?
        } else {
            let file = self
                .fd_table
                .lock()
                .get(Fd(args.fd))
                .ok_or(KernelError::BadFd)?;
            let inode = file.inode().ok_or(KernelError::BadFd)?;
            VMObject::for_inode(inode)
        };

        let region = if args.addr != 0 && args.flags & MAP_FIXED != 0 {
            if args.addr & PAGE_MASK != 0 {
                return Err(KernelError::InvalidValue);
            }
            self.vm_space().map_object_at(
                object,
                prot,
                VirtualRange::new(VA::from_value(args.addr), length),
                args.offset,
            )?
        } else {
            if args.addr != 0 {
                warn!(
                    "mmap: address 0x{:x} requested without MAP_FIXED, ignoring",
                    args.addr
                );
            }
            self.vm_space().map_object(object, prot, args.offset)?
        };

        mem.used_pmem += region.size();
        let start = region.start().value();
        mem.vm_regions.push(region);
        Ok(start)
    }

    /// Unmaps the region that starts at `addr` and is exactly `length`
    /// bytes long.
    pub fn sys_munmap(&self, addr: UA, length: usize) -> Result<usize> {
        let mut mem = self.mem.lock();
        let start = VA::from_value(addr.value());

        let Some(index) = mem
            .vm_regions
            .iter()
            .position(|region| region.start() == start && region.size() == length)
        else {
            warn!(
                "munmap: no region at 0x{:x} with length 0x{:x}",
                addr.value(),
                length
            );
            return Err(KernelError::NoMemRegion);
        };

        mem.used_pmem = mem.used_pmem.saturating_sub(length);
        mem.vm_regions.remove(index);
        Ok(0)
    }

    /// Replaces the protection of the region that starts at `addr` and is
    /// exactly `length` bytes long.
    pub fn sys_mprotect(&self, addr: UA, length: usize, prot_flags: i32) -> Result<usize> {
        let prot = prot_from_flags(prot_flags);
        let mem = self.mem.lock();
        let start = VA::from_value(addr.value());

        let Some(region) = mem
            .vm_regions
            .iter()
            .find(|region| region.start() == start && region.size() == length)
        else {
            warn!(
                "mprotect: no region at 0x{:x} with length 0x{:x}",
                addr.value(),
                length
            );
            return Err(KernelError::NoMemRegion);
        };

        region.set_prot(prot);
        self.vm_space().remap_region(region)?;
        Ok(0)
    }
}
