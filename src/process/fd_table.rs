//! File-descriptor bookkeeping.
//!
//! Only what the memory syscalls need: descriptors resolve to an
//! [`OpenFile`], and an open file may or may not be backed by an inode.
//! Cursor state, flags, and the rest of the I/O layer live elsewhere.

use alloc::{sync::Arc, vec::Vec};

use libkernel::error::{KernelError, Result};
use libkernel::fs::Inode;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(pub i32);

impl Fd {
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

/// An open file as the memory subsystem sees it.
pub struct OpenFile {
    inode: Option<Arc<dyn Inode>>,
}

impl OpenFile {
    pub fn from_inode(inode: Arc<dyn Inode>) -> Arc<Self> {
        Arc::new(Self { inode: Some(inode) })
    }

    /// A file with no backing inode (pipe ends, character devices). Cannot
    /// be memory-mapped.
    pub fn without_inode() -> Arc<Self> {
        Arc::new(Self { inode: None })
    }

    pub fn inode(&self) -> Option<Arc<dyn Inode>> {
        self.inode.clone()
    }
}

const MAX_FDS: usize = 8192;

#[derive(Default)]
pub struct FileDescriptorTable {
    entries: Vec<Option<Arc<OpenFile>>>,
}

impl FileDescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The file behind `fd`, if the descriptor is open.
    pub fn get(&self, fd: Fd) -> Option<Arc<OpenFile>> {
        if fd.0 < 0 {
            return None;
        }
        self.entries.get(fd.0 as usize).and_then(Clone::clone)
    }

    /// Installs `file` in the lowest free slot.
    pub fn insert(&mut self, file: Arc<OpenFile>) -> Result<Fd> {
        if let Some(index) = self.entries.iter().position(Option::is_none) {
            self.entries[index] = Some(file);
            return Ok(Fd(index as i32));
        }
        if self.entries.len() >= MAX_FDS {
            return Err(KernelError::BadFd);
        }
        self.entries.push(Some(file));
        Ok(Fd((self.entries.len() - 1) as i32))
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        if fd.0 < 0 {
            return Err(KernelError::BadFd);
        }
        match self.entries.get_mut(fd.0 as usize) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                Ok(())
            }
            _ => Err(KernelError::BadFd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_hands_out_ascending_descriptors() {
        let mut table = FileDescriptorTable::new();
        assert_eq!(table.insert(OpenFile::without_inode()).unwrap(), Fd(0));
        assert_eq!(table.insert(OpenFile::without_inode()).unwrap(), Fd(1));
    }

    #[test]
    fn closed_slots_are_reused_lowest_first() {
        let mut table = FileDescriptorTable::new();
        let a = table.insert(OpenFile::without_inode()).unwrap();
        let _b = table.insert(OpenFile::without_inode()).unwrap();

        table.close(a).unwrap();
        assert!(table.get(a).is_none());
        assert_eq!(table.insert(OpenFile::without_inode()).unwrap(), a);
    }

    #[test]
    fn bad_descriptors_miss() {
        let mut table = FileDescriptorTable::new();
        assert!(table.get(Fd(-1)).is_none());
        assert!(table.get(Fd(7)).is_none());
        assert_eq!(table.close(Fd(7)).unwrap_err(), KernelError::BadFd);
    }
}
