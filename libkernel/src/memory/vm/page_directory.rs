//! Contract between a [`VMSpace`] and the hardware page-table layer.
//!
//! [`VMSpace`]: super::VMSpace

use crate::error::Result;
use crate::memory::region::VirtualRange;

use super::region::VMRegion;

/// The page-table walker backing one address space.
///
/// Both operations are invoked with the owning space's lock held and must
/// not call back into the space. How unresolved anonymous pages are encoded
/// (non-present, COW-eligible) is this layer's policy.
pub trait PageDirectory: Sized {
    /// Installs translations covering `region`'s range with its current
    /// protection. Called a second time for the same range it acts as a
    /// remap, replacing the protection bits in place.
    fn map_region(&mut self, region: &VMRegion<Self>) -> Result<()>;

    /// Tears down the translations covering `range` and flushes the TLB of
    /// the CPU that owns this space.
    fn unmap_range(&mut self, range: VirtualRange);
}
