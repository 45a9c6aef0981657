//! Shared-memory syscalls.
//!
//! `shmcreate` allocates an anonymous object, grants the creator
//! read/write, and maps it. `shmallow` widens the object's grant table;
//! `shmattach` maps an object somebody else created with whatever
//! permissions the caller was granted; `shmdetach` drops the caller's
//! mapping again.
//!
//! A missing read grant on attach is reported as `NoMemRegion`, the same
//! error as a nonexistent id, so attach failures cannot be used to probe
//! which ids are in use.

use alloc::sync::Arc;

use libkernel::error::{KernelError, Result};
use libkernel::memory::address::{TUA, UA, VA};
use libkernel::memory::region::VirtualRange;
use libkernel::memory::vm::object::{VMObject, VMProt};
use libkernel::memory::vm::page_directory::PageDirectory;
use libkernel::memory::vm::shm::ShmId;
use libkernel::proc::Pid;

use super::uaccess::{self, UserCopyable};
use crate::process::{Process, table};

pub const SHM_READ: i32 = 0x1;
pub const SHM_WRITE: i32 = 0x2;
pub const SHM_SHARE: i32 = 0x4;

/// Result record written back to user space by `shmcreate` and
/// `shmattach`. Field order is ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Shm {
    pub ptr: usize,
    pub size: usize,
    pub id: u32,
}

// SAFETY: #[repr(C)] plain data, valid for any bit pattern.
unsafe impl UserCopyable for Shm {}

impl<PD: PageDirectory> Process<PD> {
    /// Creates a shared segment of `size` bytes, mapped read/write at
    /// `addr` when one is given, anywhere otherwise.
    pub fn sys_shmcreate(&self, addr: UA, size: usize, out: TUA<Shm>) -> Result<usize> {
        uaccess::validate_ptr(out)?;

        let object = VMObject::new_anonymous(size)?;
        let id = object.share(self.pid(), VMProt::RW)?;

        let region = if addr.is_null() {
            self.vm_space().map_object(object, VMProt::RW, 0)?
        } else {
            self.vm_space().map_object_at(
                object,
                VMProt::RW,
                VirtualRange::new(VA::from_value(addr.value()), 0),
                0,
            )?
        };

        let record = Shm {
            ptr: region.start().value(),
            size: region.size(),
            id: id.raw(),
        };

        {
            let mut mem = self.mem.lock();
            mem.used_shmem += region.size();
            mem.vm_regions.push(region);
        }

        uaccess::copy_to_user(out, record)?;
        Ok(0)
    }

    /// Maps the shared segment `id` into this process with the permissions
    /// it has been granted.
    pub fn sys_shmattach(&self, id: u32, addr: UA, out: TUA<Shm>) -> Result<usize> {
        uaccess::validate_ptr(out)?;

        let object = VMObject::get_shared(ShmId::from_raw(id))?;
        let perms = object.shared_permissions(self.pid())?;
        if !perms.read {
            return Err(KernelError::NoMemRegion);
        }

        let region = if addr.is_null() {
            self.vm_space().map_object(object, perms, 0)?
        } else {
            self.vm_space().map_object_at(
                object,
                perms,
                VirtualRange::new(VA::from_value(addr.value()), 0),
                0,
            )?
        };

        let record = Shm {
            ptr: region.start().value(),
            size: region.size(),
            id,
        };

        {
            let mut mem = self.mem.lock();
            mem.used_shmem += region.size();
            mem.vm_regions.push(region);
        }

        uaccess::copy_to_user(out, record)?;
        Ok(0)
    }

    /// Unmaps this process's mapping of the shared segment `id`.
    pub fn sys_shmdetach(&self, id: u32) -> Result<usize> {
        let object = VMObject::get_shared(ShmId::from_raw(id))?;

        let mut mem = self.mem.lock();
        let index = mem
            .vm_regions
            .iter()
            .position(|region| Arc::ptr_eq(region.object(), &object))
            .ok_or(KernelError::NoMemRegion)?;

        mem.used_shmem -= object.size();
        mem.vm_regions.remove(index);
        Ok(0)
    }

    /// Grants `pid` access to the shared segment `id`.
    pub fn sys_shmallow(&self, id: u32, pid: Pid, perms: i32) -> Result<usize> {
        // Re-granting a segment this process did not create is not
        // supported.
        if perms & SHM_SHARE != 0 {
            return Err(KernelError::InvalidValue);
        }
        if perms & (SHM_READ | SHM_WRITE) == 0 {
            return Err(KernelError::InvalidValue);
        }
        if perms & SHM_WRITE != 0 && perms & SHM_READ == 0 {
            return Err(KernelError::InvalidValue);
        }
        if !table::pid_exists(pid) {
            return Err(KernelError::InvalidValue);
        }

        let object = VMObject::get_shared(ShmId::from_raw(id))?;
        object.share(
            pid,
            VMProt {
                read: perms & SHM_READ != 0,
                write: perms & SHM_WRITE != 0,
                execute: false,
                cow: false,
            },
        )?;
        Ok(0)
    }
}
