//! Process state needed by the memory syscall surface.
//!
//! The full task model (scheduling, credentials, signals) lives elsewhere.
//! At this layer a [`Process`] is a PID, a VM space, a file-descriptor
//! table, and the memory accounting the syscalls maintain.

pub mod fd_table;
pub mod table;

use alloc::{sync::Arc, vec::Vec};

use libkernel::error::Result;
use libkernel::memory::PAGE_SIZE;
use libkernel::memory::address::VA;
use libkernel::memory::vm::VMSpace;
use libkernel::memory::vm::page_directory::PageDirectory;
use libkernel::memory::vm::region::VMRegion;
use libkernel::proc::Pid;
use libkernel::sync::SpinLock;

use crate::memory::{USER_VM_BASE, USER_VM_CEILING};
use fd_table::{Fd, FileDescriptorTable, OpenFile};

/// Memory bookkeeping guarded by the process memory lock. That lock nests
/// outside the VM space lock and is never taken the other way around.
pub(crate) struct ProcessMem<PD: PageDirectory> {
    pub vm_regions: Vec<Arc<VMRegion<PD>>>,
    pub used_pmem: usize,
    pub used_shmem: usize,
}

pub struct Process<PD: PageDirectory> {
    pid: Pid,
    vm_space: Arc<VMSpace<PD>>,
    pub(crate) fd_table: SpinLock<FileDescriptorTable>,
    pub(crate) mem: SpinLock<ProcessMem<PD>>,
}

impl<PD: PageDirectory> Process<PD> {
    /// Creates a process owning the whole user window, with the null page
    /// reserved so no mapping can ever cover address zero.
    pub fn new(pid: Pid, page_directory: PD) -> Result<Arc<Self>> {
        let vm_space = VMSpace::new(
            VA::from_value(USER_VM_BASE),
            USER_VM_CEILING - USER_VM_BASE,
            page_directory,
        );
        vm_space.reserve_region(VA::null(), PAGE_SIZE)?;

        let process = Arc::new(Self {
            pid,
            vm_space,
            fd_table: SpinLock::new(FileDescriptorTable::new()),
            mem: SpinLock::new(ProcessMem {
                vm_regions: Vec::new(),
                used_pmem: 0,
                used_shmem: 0,
            }),
        });
        table::register(pid);
        Ok(process)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn vm_space(&self) -> &Arc<VMSpace<PD>> {
        &self.vm_space
    }

    /// Bytes of private mapped memory charged to this process.
    pub fn used_pmem(&self) -> usize {
        self.mem.lock().used_pmem
    }

    /// Bytes of shared memory charged to this process.
    pub fn used_shmem(&self) -> usize {
        self.mem.lock().used_shmem
    }

    /// Installs `file` in the lowest free descriptor slot.
    pub fn open_file(&self, file: Arc<OpenFile>) -> Result<Fd> {
        self.fd_table.lock().insert(file)
    }
}

impl<PD: PageDirectory> Drop for Process<PD> {
    fn drop(&mut self) {
        table::unregister(self.pid);
    }
}
