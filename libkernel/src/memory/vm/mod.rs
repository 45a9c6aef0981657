//! Per-process virtual memory spaces.
//!
//! A [`VMSpace`] owns one process's virtual address window: the
//! [`AddressRangeMap`] that tracks which extents are in use, the
//! [`PageDirectory`] that installs translations, and a weak registry of the
//! regions currently placed in the window. Mapping produces a reference
//! counted [`VMRegion`]; dropping the last reference (or unmapping
//! explicitly) returns the extent and tears the translations down.
//!
//! Every public operation holds the space's lock from entry to exit, so
//! operations on one space are strictly serialized. The page directory is
//! only ever called with that lock held and must not call back in.

pub mod object;
pub mod page_directory;
pub mod region;
pub mod shm;


use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use crate::error::{KernelError, Result};
use crate::sync::SpinLock;

use super::address::VA;
use super::range_map::AddressRangeMap;
use super::region::VirtualRange;
use object::{VMObject, VMProt};
use page_directory::PageDirectory;
use region::VMRegion;

struct Inner<PD: PageDirectory> {
    map: AddressRangeMap,
    regions: Vec<Weak<VMRegion<PD>>>,
    page_directory: PD,
}

pub struct VMSpace<PD: PageDirectory> {
    start: VA,
    size: usize,
    inner: SpinLock<Inner<PD>>,
}

impl<PD: PageDirectory> VMSpace<PD> {
    /// Creates a space covering `[start, start + size)`, with nothing
    /// mapped.
    pub fn new(start: VA, size: usize, page_directory: PD) -> Arc<Self> {
        Arc::new(Self {
            start,
            size,
            inner: SpinLock::new(Inner {
                map: AddressRangeMap::new(start, size),
                regions: Vec::new(),
                page_directory,
            }),
        })
    }

    pub fn start(&self) -> VA {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Total bytes of the window currently allocated, reserved extents
    /// included.
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().map.used_bytes()
    }

    /// Maps `object` at the lowest free address that fits it.
    ///
    /// `offset` is the byte offset into the object at which the view
    /// begins; it is zero for every anonymous mapping.
    pub fn map_object(
        self: &Arc<Self>,
        object: Arc<VMObject>,
        prot: VMProt,
        offset: usize,
    ) -> Result<Arc<VMRegion<PD>>> {
        let size = object.size();
        let mut inner = self.inner.lock();
        let start = inner.map.alloc_size(size)?;
        self.finish_map(
            &mut inner,
            object,
            prot,
            VirtualRange::new(start, size),
            offset,
        )
    }

    /// Maps `object` at a caller-chosen address.
    ///
    /// A zero-length `range` takes its length from the object; a non-zero
    /// length must equal the object's size, since partial views are not
    /// supported.
    pub fn map_object_at(
        self: &Arc<Self>,
        object: Arc<VMObject>,
        prot: VMProt,
        range: VirtualRange,
        offset: usize,
    ) -> Result<Arc<VMRegion<PD>>> {
        let range = if range.is_empty() {
            VirtualRange::new(range.start(), object.size())
        } else {
            range
        };
        if range.size() != object.size() || !range.is_page_aligned() {
            return Err(KernelError::InvalidValue);
        }

        let mut inner = self.inner.lock();
        inner.map.alloc_at(range.start(), range.size())?;
        self.finish_map(&mut inner, object, prot, range, offset)
    }

    fn finish_map(
        self: &Arc<Self>,
        inner: &mut Inner<PD>,
        object: Arc<VMObject>,
        prot: VMProt,
        range: VirtualRange,
        offset: usize,
    ) -> Result<Arc<VMRegion<PD>>> {
        let region = VMRegion::new(object, Arc::downgrade(self), range, prot, offset);

        if let Err(err) = inner.page_directory.map_region(&region) {
            // Roll back. The back-reference goes first so dropping the
            // half-made region does not re-enter this space.
            region.clear_space();
            inner.map.free(range.start(), range.size());
            return Err(err);
        }

        inner.regions.push(Arc::downgrade(&region));
        Ok(region)
    }

    /// Unmaps `region`, releasing its extent and translations. The region
    /// object itself lives on until its last reference drops, but it no
    /// longer owns anything.
    pub fn unmap_region(&self, region: &Arc<VMRegion<PD>>) -> Result<()> {
        let mut inner = self.inner.lock();
        let index = inner
            .regions
            .iter()
            .position(|weak| weak.as_ptr() == Arc::as_ptr(region))
            .ok_or(KernelError::NoMemRegion)?;

        inner.regions.remove(index);
        self.teardown(&mut inner, region)
    }

    /// Unmaps the region whose start address is exactly `address`.
    pub fn unmap_region_by_address(&self, address: VA) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut found = None;
        for (index, weak) in inner.regions.iter().enumerate() {
            if let Some(region) = weak.upgrade()
                && region.start() == address
            {
                found = Some((index, region));
                break;
            }
        }
        let (index, region) = found.ok_or(KernelError::NoMemRegion)?;

        inner.regions.remove(index);
        self.teardown(&mut inner, &region)
    }

    fn teardown(&self, inner: &mut Inner<PD>, region: &Arc<VMRegion<PD>>) -> Result<()> {
        region.clear_space();
        let range = region.range();
        inner.page_directory.unmap_range(range);
        inner.map.free(range.start(), range.size());
        Ok(())
    }

    /// The live region starting exactly at `address`.
    pub fn get_region(&self, address: VA) -> Result<Arc<VMRegion<PD>>> {
        let inner = self.inner.lock();
        for weak in &inner.regions {
            if let Some(region) = weak.upgrade()
                && region.start() == address
            {
                return Ok(region);
            }
        }
        Err(KernelError::NoMemRegion)
    }

    /// Claims `[start, start + size)` without creating a region, so nothing
    /// can ever be mapped there. Used for the null-page guard and other
    /// blacklisted windows.
    pub fn reserve_region(&self, start: VA, size: usize) -> Result<VA> {
        if !start.is_page_aligned() || !super::is_page_multiple(size) {
            return Err(KernelError::InvalidValue);
        }
        self.inner.lock().map.alloc_at(start, size)
    }

    /// Re-installs `region`'s translations with its current protection.
    /// Called after a `set_prot` to push the new bits into the page tables.
    pub fn remap_region(&self, region: &Arc<VMRegion<PD>>) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner
            .regions
            .iter()
            .any(|weak| weak.as_ptr() == Arc::as_ptr(region))
        {
            return Err(KernelError::NoMemRegion);
        }
        inner.page_directory.map_region(region)
    }

    /// Releases a region's extent when its last reference drops without an
    /// explicit unmap.
    fn region_dropped(&self, range: VirtualRange) {
        let mut inner = self.inner.lock();
        inner.page_directory.unmap_range(range);
        inner.map.free(range.start(), range.size());
        inner.regions.retain(|weak| weak.strong_count() > 0);
    }
}

impl<PD: PageDirectory> Drop for VMSpace<PD> {
    fn drop(&mut self) {
        // Sever every surviving region's back-reference before the range
        // map goes away; a region still held by a consumer must drop
        // quietly.
        let inner = self.inner.get_mut();
        for weak in &inner.regions {
            if let Some(region) = weak.upgrade() {
                region.clear_space();
            }
        }
    }
}
