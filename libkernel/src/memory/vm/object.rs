//! Memory-backing objects.
//!
//! A [`VMObject`] is *what* a mapping maps, decoupled from *where*: either
//! anonymous zero-filled memory or the pages of an inode. Objects are
//! reference-counted and may be mapped into several address spaces at once.
//! An anonymous object that has been shared also carries a kernel-wide
//! shared-memory id and a per-process grant table.

use core::fmt;

use alloc::{collections::BTreeMap, sync::Arc};

use crate::error::{KernelError, Result};
use crate::fs::Inode;
use crate::memory::page_align_up;
use crate::proc::Pid;
use crate::sync::SpinLock;

use super::shm::{self, ShmId};

/// Protection bits for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VMProt {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    /// Copy-on-write: the fault path copies the page before the first write
    /// goes through.
    pub cow: bool,
}

impl VMProt {
    pub const R: VMProt = VMProt {
        read: true,
        write: false,
        execute: false,
        cow: false,
    };

    pub const RW: VMProt = VMProt {
        read: true,
        write: true,
        execute: false,
        cow: false,
    };

    pub const RWX: VMProt = VMProt {
        read: true,
        write: true,
        execute: true,
        cow: false,
    };
}

/// Shared-memory identity of an anonymous object. Empty until the first
/// `share` call.
struct ShmState {
    id: Option<ShmId>,
    grants: BTreeMap<Pid, VMProt>,
}

enum VMObjectKind {
    /// Zero-filled pages, materialized on first touch.
    Anonymous(SpinLock<ShmState>),
    /// Pages faulted in from the backing inode.
    Inode(Arc<dyn Inode>),
}

pub struct VMObject {
    size: usize,
    kind: VMObjectKind,
}

impl fmt::Debug for VMObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VMObjectKind::Anonymous(_) => write!(f, "Anonymous"),
            VMObjectKind::Inode(_) => write!(f, "Inode"),
        }
    }
}

impl fmt::Debug for VMObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VMObject")
            .field("size", &self.size)
            .field("kind", &self.kind)
            .finish()
    }
}

impl VMObject {
    /// Creates an anonymous object of `size` bytes, rounded up to a whole
    /// number of pages.
    pub fn new_anonymous(size: usize) -> Result<Arc<VMObject>> {
        if size == 0 {
            return Err(KernelError::InvalidValue);
        }

        Ok(Arc::new(Self {
            size: page_align_up(size),
            kind: VMObjectKind::Anonymous(SpinLock::new(ShmState {
                id: None,
                grants: BTreeMap::new(),
            })),
        }))
    }

    /// Creates an object over the whole of `inode`, sized to its length
    /// rounded up to a page.
    pub fn for_inode(inode: Arc<dyn Inode>) -> Arc<VMObject> {
        Arc::new(Self {
            size: page_align_up(inode.len()),
            kind: VMObjectKind::Inode(inode),
        })
    }

    /// Size in bytes. Fixed at construction.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.kind, VMObjectKind::Anonymous(_))
    }

    /// The backing inode, for inode-backed objects.
    pub fn inode(&self) -> Option<Arc<dyn Inode>> {
        match &self.kind {
            VMObjectKind::Anonymous(_) => None,
            VMObjectKind::Inode(inode) => Some(inode.clone()),
        }
    }

    /// Grants `pid` access with `prot`, overwriting any earlier grant.
    ///
    /// The first call also registers the object in the shared-memory
    /// registry, fixing its id for the rest of its life. Grants can be added
    /// and widened but never revoked.
    ///
    /// Only anonymous objects can be shared.
    pub fn share(self: &Arc<Self>, pid: Pid, prot: VMProt) -> Result<ShmId> {
        let state = match &self.kind {
            VMObjectKind::Anonymous(state) => state,
            VMObjectKind::Inode(_) => return Err(KernelError::InvalidValue),
        };

        let mut state = state.lock();
        let id = match state.id {
            Some(id) => id,
            None => {
                let id = shm::register(self);
                state.id = Some(id);
                id
            }
        };
        state.grants.insert(pid, prot);
        Ok(id)
    }

    /// The grant for `pid`, if one has been made.
    pub fn shared_permissions(&self, pid: Pid) -> Result<VMProt> {
        match &self.kind {
            VMObjectKind::Anonymous(state) => state
                .lock()
                .grants
                .get(&pid)
                .copied()
                .ok_or(KernelError::NoMemRegion),
            VMObjectKind::Inode(_) => Err(KernelError::NoMemRegion),
        }
    }

    /// The object's shared-memory id, once `share` has assigned one.
    pub fn shm_id(&self) -> Option<ShmId> {
        match &self.kind {
            VMObjectKind::Anonymous(state) => state.lock().id,
            VMObjectKind::Inode(_) => None,
        }
    }

    /// Looks up a shared object by id and promotes the registry's weak
    /// reference.
    pub fn get_shared(id: ShmId) -> Result<Arc<VMObject>> {
        shm::get(id)
    }
}
