//! Placed mappings.

use alloc::sync::{Arc, Weak};
use core::fmt;
use core::mem;

use crate::memory::address::VA;
use crate::memory::region::VirtualRange;
use crate::sync::SpinLock;

use super::VMSpace;
use super::object::{VMObject, VMProt};
use super::page_directory::PageDirectory;

/// A placed view of a [`VMObject`] inside one address space.
///
/// The region owns its extent of the space's range map for exactly as long
/// as it lives: the extent is claimed when the space creates the region and
/// released once, either by an explicit unmap or, failing that, when the
/// last reference drops. The weak back-reference to the space keeps a
/// region that outlives its space from touching freed bookkeeping.
pub struct VMRegion<PD: PageDirectory> {
    object: Arc<VMObject>,
    space: SpinLock<Weak<VMSpace<PD>>>,
    range: VirtualRange,
    prot: SpinLock<VMProt>,
    offset: usize,
}

impl<PD: PageDirectory> VMRegion<PD> {
    pub(super) fn new(
        object: Arc<VMObject>,
        space: Weak<VMSpace<PD>>,
        range: VirtualRange,
        prot: VMProt,
        offset: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            object,
            space: SpinLock::new(space),
            range,
            prot: SpinLock::new(prot),
            offset,
        })
    }

    pub fn object(&self) -> &Arc<VMObject> {
        &self.object
    }

    pub fn range(&self) -> VirtualRange {
        self.range
    }

    pub fn start(&self) -> VA {
        self.range.start()
    }

    pub fn size(&self) -> usize {
        self.range.size()
    }

    pub fn prot(&self) -> VMProt {
        *self.prot.lock()
    }

    /// Replaces the protection record. The caller must follow up by asking
    /// the space to remap the region, or the page tables will keep the old
    /// bits.
    pub fn set_prot(&self, prot: VMProt) {
        *self.prot.lock() = prot;
    }

    /// Byte offset into the object at which this view begins.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Severs the back-reference so a later drop will not call into the
    /// space.
    pub(super) fn clear_space(&self) {
        *self.space.lock() = Weak::new();
    }
}

impl<PD: PageDirectory> fmt::Debug for VMRegion<PD> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VMRegion")
            .field("range", &self.range)
            .field("prot", &*self.prot.lock())
            .field("offset", &self.offset)
            .finish()
    }
}

impl<PD: PageDirectory> Drop for VMRegion<PD> {
    fn drop(&mut self) {
        let space = mem::replace(&mut *self.space.lock(), Weak::new());
        if let Some(space) = space.upgrade() {
            space.region_dropped(self.range);
        }
    }
}
