//! First-fit allocator over a process's virtual address window.
//!
//! An [`AddressRangeMap`] tiles a half-open range `[start, start + size)`
//! with extents that are each either in use or free. Allocation splits a
//! free extent; freeing flips an extent back and immediately coalesces it
//! with free neighbors, so no two adjacent extents are ever both free.
//!
//! The tiling is kept as a vector of extents sorted by start address.
//! Process mappings number in the tens, so a linear first-fit scan is
//! deterministic and fast enough; the split and merge operations stay
//! index-based and simple.
//!
//! Callers own the pairing contract: every `free` must name the exact
//! `(start, size)` of a live allocation. Breaking it is a kernel bug, not a
//! runtime error, and panics.

use alloc::vec::Vec;

use crate::error::{KernelError, Result};
use crate::memory::{address::VA, is_page_multiple};

/// One extent of the tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    start: VA,
    size: usize,
    used: bool,
}

impl Extent {
    fn end(&self) -> VA {
        self.start.add_bytes(self.size)
    }

    fn contains(&self, addr: VA) -> bool {
        addr >= self.start && addr < self.end()
    }
}

pub struct AddressRangeMap {
    start: VA,
    size: usize,
    extents: Vec<Extent>,
    used_bytes: usize,
}

impl AddressRangeMap {
    /// Creates a map covering `[start, start + size)`, entirely free.
    pub fn new(start: VA, size: usize) -> Self {
        assert!(start.is_page_aligned(), "range map start not page-aligned");
        assert!(
            is_page_multiple(size) && size > 0,
            "range map size not a whole number of pages"
        );

        let mut extents = Vec::with_capacity(8);
        extents.push(Extent {
            start,
            size,
            used: false,
        });

        Self {
            start,
            size,
            extents,
            used_bytes: 0,
        }
    }

    pub fn start(&self) -> VA {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Total bytes currently allocated.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Allocates `size` bytes at the lowest free address that fits.
    ///
    /// First-fit: the extents are scanned in address order and the first
    /// free one large enough is taken, splitting off its tail when it is
    /// larger than the request.
    pub fn alloc_size(&mut self, size: usize) -> Result<VA> {
        assert!(is_page_multiple(size), "allocation size not page-aligned");
        if size == 0 {
            return Err(KernelError::InvalidValue);
        }

        let index = self
            .extents
            .iter()
            .position(|extent| !extent.used && extent.size >= size)
            .ok_or(KernelError::NoMemory)?;

        let start = self.extents[index].start;
        if self.extents[index].size == size {
            self.extents[index].used = true;
        } else {
            let extent = &mut self.extents[index];
            extent.start = extent.start.add_bytes(size);
            extent.size -= size;
            self.extents.insert(
                index,
                Extent {
                    start,
                    size,
                    used: true,
                },
            );
        }

        self.used_bytes += size;
        Ok(start)
    }

    /// Allocates exactly `[addr, addr + size)`.
    ///
    /// Fails if the span is not wholly inside one free extent. Splits the
    /// extent into up to three pieces: an optional free prefix, the used
    /// span, and an optional free suffix.
    pub fn alloc_at(&mut self, addr: VA, size: usize) -> Result<VA> {
        assert!(addr.is_page_aligned(), "allocation address not page-aligned");
        assert!(is_page_multiple(size), "allocation size not page-aligned");
        if size == 0 {
            return Err(KernelError::InvalidValue);
        }

        let index = self
            .extents
            .iter()
            .position(|extent| extent.contains(addr))
            .ok_or(KernelError::NoMemory)?;

        let extent = self.extents[index];
        if extent.used {
            return Err(KernelError::NoMemory);
        }

        let offset = addr.value() - extent.start.value();
        if extent.size - offset < size {
            return Err(KernelError::NoMemory);
        }

        // Carve the suffix first so `index` stays valid for the prefix.
        let alloc_end = addr.add_bytes(size);
        if extent.end() > alloc_end {
            self.extents.insert(
                index + 1,
                Extent {
                    start: alloc_end,
                    size: extent.end().value() - alloc_end.value(),
                    used: false,
                },
            );
        }

        if extent.start < addr {
            self.extents[index] = Extent {
                start: extent.start,
                size: offset,
                used: false,
            };
            self.extents.insert(
                index + 1,
                Extent {
                    start: addr,
                    size,
                    used: true,
                },
            );
        } else {
            self.extents[index] = Extent {
                start: addr,
                size,
                used: true,
            };
        }

        self.used_bytes += size;
        Ok(addr)
    }

    /// Returns `[addr, addr + size)` to the free pool.
    ///
    /// `(addr, size)` must exactly match a previous allocation; anything
    /// else is a caller bug and panics.
    pub fn free(&mut self, addr: VA, size: usize) {
        let index = match self.extents.binary_search_by_key(&addr, |e| e.start) {
            Ok(index) => index,
            Err(_) => panic!("free of unallocated extent at {addr:?}"),
        };

        let extent = &mut self.extents[index];
        assert!(extent.used, "double free of extent at {addr:?}");
        assert_eq!(extent.size, size, "free size does not match extent at {addr:?}");

        extent.used = false;
        self.used_bytes -= size;

        // Coalesce with the next extent, then the previous one.
        if index + 1 < self.extents.len() && !self.extents[index + 1].used {
            let next = self.extents.remove(index + 1);
            self.extents[index].size += next.size;
        }
        if index > 0 && !self.extents[index - 1].used {
            let prev = self.extents.remove(index - 1);
            self.extents[index - 1].start = prev.start;
            self.extents[index - 1].size += prev.size;
        }
    }

    /// The current tiling, in address order, as `(start, size, used)`.
    pub fn extents(&self) -> impl Iterator<Item = (VA, usize, bool)> + '_ {
        self.extents.iter().map(|e| (e.start, e.size, e.used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;
    use proptest::prelude::*;

    fn map(start: usize, size: usize) -> AddressRangeMap {
        AddressRangeMap::new(VA::from_value(start), size)
    }

    fn va(value: usize) -> VA {
        VA::from_value(value)
    }

    /// Checks every structural invariant of the tiling.
    fn assert_invariants(map: &AddressRangeMap) {
        let extents: Vec<_> = map.extents().collect();
        assert!(!extents.is_empty());

        let mut expected_start = map.start();
        let mut used_sum = 0;
        let mut prev_free = false;
        for (start, size, used) in &extents {
            assert_eq!(*start, expected_start, "extents not contiguous");
            assert!(*size > 0, "empty extent");
            assert!(start.is_page_aligned());
            assert_eq!(size % PAGE_SIZE, 0);
            assert!(!(prev_free && !used), "adjacent free extents");
            if *used {
                used_sum += size;
            }
            prev_free = !used;
            expected_start = start.add_bytes(*size);
        }
        assert_eq!(expected_start, map.start().add_bytes(map.size()));
        assert_eq!(used_sum, map.used_bytes());
    }

    #[test]
    fn first_fit_reuses_lowest_hole() {
        // Space [0x1000, 0x5000).
        let mut m = map(0x1000, 0x4000);

        assert_eq!(m.alloc_size(0x1000).unwrap(), va(0x1000));
        assert_eq!(m.alloc_size(0x2000).unwrap(), va(0x2000));
        m.free(va(0x1000), 0x1000);
        assert_eq!(m.alloc_size(0x1000).unwrap(), va(0x1000));
        assert_invariants(&m);
    }

    #[test]
    fn alloc_exact_remaining_succeeds_one_more_page_fails() {
        let mut m = map(0x1000, 0x4000);

        m.alloc_size(0x1000).unwrap();
        assert_eq!(m.alloc_size(0x3000).unwrap(), va(0x2000));
        assert_eq!(m.alloc_size(PAGE_SIZE), Err(KernelError::NoMemory));
        assert_invariants(&m);
    }

    #[test]
    fn alloc_zero_is_rejected() {
        let mut m = map(0x1000, 0x4000);
        assert_eq!(m.alloc_size(0), Err(KernelError::InvalidValue));
        assert_eq!(m.alloc_at(va(0x1000), 0), Err(KernelError::InvalidValue));
    }

    #[test]
    fn alloc_larger_than_space_fails_without_side_effects() {
        let mut m = map(0x1000, 0x4000);
        assert_eq!(m.alloc_size(0x5000), Err(KernelError::NoMemory));
        assert_eq!(m.extents().count(), 1);
        assert_eq!(m.used_bytes(), 0);
    }

    #[test]
    fn alloc_at_splits_three_ways() {
        // Space [0x0, 0x10000); carve out the middle.
        let mut m = map(0x0, 0x10000);

        assert_eq!(m.alloc_at(va(0x4000), 0x1000).unwrap(), va(0x4000));
        let extents: Vec<_> = m.extents().collect();
        assert_eq!(
            extents,
            vec![
                (va(0x0), 0x4000, false),
                (va(0x4000), 0x1000, true),
                (va(0x5000), 0xb000, false),
            ]
        );
        assert_invariants(&m);
    }

    #[test]
    fn alloc_at_start_of_extent_omits_prefix() {
        let mut m = map(0x1000, 0x4000);

        m.alloc_at(va(0x1000), 0x1000).unwrap();
        let extents: Vec<_> = m.extents().collect();
        assert_eq!(
            extents,
            vec![(va(0x1000), 0x1000, true), (va(0x2000), 0x3000, false)]
        );
    }

    #[test]
    fn alloc_at_end_of_extent_omits_suffix() {
        let mut m = map(0x1000, 0x4000);

        m.alloc_at(va(0x4000), 0x1000).unwrap();
        let extents: Vec<_> = m.extents().collect();
        assert_eq!(
            extents,
            vec![(va(0x1000), 0x3000, false), (va(0x4000), 0x1000, true)]
        );
    }

    #[test]
    fn alloc_at_whole_extent_flips_in_place() {
        let mut m = map(0x1000, 0x2000);

        m.alloc_at(va(0x1000), 0x2000).unwrap();
        assert_eq!(m.extents().count(), 1);
        assert_eq!(m.used_bytes(), 0x2000);
    }

    #[test]
    fn alloc_at_crossing_a_used_extent_fails_unchanged() {
        let mut m = map(0x0, 0x10000);

        m.alloc_at(va(0x4000), 0x1000).unwrap();
        let before: Vec<_> = m.extents().collect();

        // [0x3000, 0x5000) crosses into the used extent.
        assert_eq!(m.alloc_at(va(0x3000), 0x2000), Err(KernelError::NoMemory));
        let after: Vec<_> = m.extents().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn alloc_at_used_address_fails() {
        let mut m = map(0x0, 0x10000);

        m.alloc_at(va(0x4000), 0x1000).unwrap();
        assert_eq!(m.alloc_at(va(0x4000), 0x1000), Err(KernelError::NoMemory));
    }

    #[test]
    fn alloc_at_outside_space_fails() {
        let mut m = map(0x1000, 0x2000);
        assert_eq!(m.alloc_at(va(0x8000), 0x1000), Err(KernelError::NoMemory));
    }

    #[test]
    fn free_coalesces_both_neighbors() {
        let mut m = map(0x0, 0x10000);

        m.alloc_at(va(0x4000), 0x1000).unwrap();
        m.free(va(0x4000), 0x1000);

        let extents: Vec<_> = m.extents().collect();
        assert_eq!(extents, vec![(va(0x0), 0x10000, false)]);
        assert_eq!(m.used_bytes(), 0);
    }

    #[test]
    fn free_coalesces_only_free_neighbors() {
        let mut m = map(0x1000, 0x4000);

        let a = m.alloc_size(0x1000).unwrap();
        let b = m.alloc_size(0x1000).unwrap();
        let c = m.alloc_size(0x1000).unwrap();

        m.free(a, 0x1000);
        m.free(c, 0x1000);
        // b is still used: the hole at a cannot merge with the one at c.
        assert_eq!(m.extents().filter(|(_, _, used)| !used).count(), 2);

        m.free(b, 0x1000);
        assert_eq!(m.extents().count(), 1);
        assert_invariants(&m);
    }

    #[test]
    fn used_bytes_tracks_allocations() {
        let mut m = map(0x1000, 0x8000);

        let a = m.alloc_size(0x2000).unwrap();
        m.alloc_size(0x1000).unwrap();
        assert_eq!(m.used_bytes(), 0x3000);

        m.free(a, 0x2000);
        assert_eq!(m.used_bytes(), 0x1000);
    }

    #[test]
    #[should_panic(expected = "free of unallocated extent")]
    fn free_of_unknown_address_panics() {
        let mut m = map(0x1000, 0x4000);
        m.alloc_size(0x1000).unwrap();
        m.free(va(0x3000), 0x1000);
    }

    #[test]
    #[should_panic(expected = "free size does not match")]
    fn free_with_wrong_size_panics() {
        let mut m = map(0x1000, 0x4000);
        let a = m.alloc_size(0x2000).unwrap();
        m.free(a, 0x1000);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut m = map(0x1000, 0x4000);
        let a = m.alloc_size(0x1000).unwrap();
        let b = m.alloc_size(0x1000).unwrap();
        // Keep b allocated so a is not coalesced away.
        let _ = b;
        m.free(a, 0x1000);
        m.free(a, 0x1000);
    }

    proptest! {
        /// Allocating then freeing everything, in any order, restores the
        /// single free extent covering the whole space.
        #[test]
        fn alloc_free_round_trip(
            sizes in prop::collection::vec(1usize..8, 1..24),
            order in prop::collection::vec(prop::num::usize::ANY, 1..24),
        ) {
            let mut m = map(0x1000, 64 * PAGE_SIZE);
            let mut live = Vec::new();

            for pages in sizes {
                let size = pages * PAGE_SIZE;
                match m.alloc_size(size) {
                    Ok(addr) => live.push((addr, size)),
                    Err(KernelError::NoMemory) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
                assert_invariants(&m);
            }

            let mut i = 0;
            while !live.is_empty() {
                let pick = order.get(i).copied().unwrap_or(0) % live.len();
                let (addr, size) = live.swap_remove(pick);
                m.free(addr, size);
                assert_invariants(&m);
                i += 1;
            }

            let extents: Vec<_> = m.extents().collect();
            prop_assert_eq!(extents, vec![(va(0x1000), 64 * PAGE_SIZE, false)]);
        }

        /// `alloc_at` followed by `free` of the same span is the identity on
        /// the tiling.
        #[test]
        fn alloc_at_free_round_trip(page in 0usize..64, pages in 1usize..16) {
            let mut m = map(0x0, 64 * PAGE_SIZE);
            let addr = va(page * PAGE_SIZE);
            let size = pages * PAGE_SIZE;

            let before: Vec<_> = m.extents().collect();
            match m.alloc_at(addr, size) {
                Ok(got) => {
                    prop_assert_eq!(got, addr);
                    assert_invariants(&m);
                    m.free(addr, size);
                }
                Err(KernelError::NoMemory) => {
                    // Must have run past the end of the space.
                    prop_assert!(page + pages > 64);
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
            let after: Vec<_> = m.extents().collect();
            prop_assert_eq!(before, after);
        }
    }
}
