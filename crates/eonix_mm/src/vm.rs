//! An address space's map of virtual memory ranges. `VmSpace` owns no
//! synchronization itself (callers wrap it the same way the kernel wraps
//! any other shared state); it tracks non-overlapping [`VmRange`]s keyed
//! by address and carves new ranges out of the gaps between them.
use core::borrow::Borrow;
use core::cell::UnsafeCell;
use core::cmp::Ordering;

use alloc::collections::btree_set::BTreeSet;

use crate::address::{AddrOps as _, VAddr, VRange};
use crate::paging::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmPermission {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl VmPermission {
    pub const NONE: Self = Self {
        read: false,
        write: false,
        execute: false,
    };

    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        execute: false,
    };
}

/// What backs a [`VmRange`]'s pages. `Anonymous` ranges are backed by an
/// [`crate::amap::AnonMap`]; `Guard` ranges are never mapped and exist
/// only to make an adjacent range's overflow fault instead of silently
/// running into the next mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmRangeKind {
    Anonymous,
    Guard,
}

/// One mapped (or reserved) region of an address space. Ranges are kept
/// in a [`VmSpace`] ordered and compared purely by their address range,
/// mirroring how the overlap-aware ordering on [`VRange`] lets a
/// `BTreeSet` double as an interval index: `range.cmp` treats any two
/// overlapping ranges as equal, so `get`/`range` queries by a probe range
/// find overlaps directly.
#[derive(Debug)]
pub struct VmRange {
    range: UnsafeCell<VRange>,
    pub kind: VmRangeKind,
    pub permission: VmPermission,
}

// SAFETY: `range`'s interior mutability is only ever exercised by the
// `VmSpace` that owns the containing `BTreeSet`, which serializes access
// the same way `MMListLocked` does in the kernel's own mm list.
unsafe impl Send for VmRange {}
unsafe impl Sync for VmRange {}

impl Clone for VmRange {
    fn clone(&self) -> Self {
        Self {
            range: UnsafeCell::new(self.range()),
            kind: self.kind,
            permission: self.permission,
        }
    }
}

impl VmRange {
    pub fn new(range: VRange, kind: VmRangeKind, permission: VmPermission) -> Self {
        Self {
            range: range.into(),
            kind,
            permission,
        }
    }

    fn range_borrow(&self) -> &VRange {
        unsafe { self.range.get().as_ref().unwrap() }
    }

    pub fn range(&self) -> VRange {
        *self.range_borrow()
    }
}

impl Eq for VmRange {}
impl PartialEq for VmRange {
    fn eq(&self, other: &Self) -> bool {
        self.range_borrow().eq(other.range_borrow())
    }
}
impl PartialOrd for VmRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.range_borrow().partial_cmp(other.range_borrow())
    }
}
impl Ord for VmRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.range_borrow().cmp(other.range_borrow())
    }
}
impl Borrow<VRange> for VmRange {
    fn borrow(&self) -> &VRange {
        self.range_borrow()
    }
}

/// Status values `VmSpace` operations distinguish, per `spec.md` §7/§8's
/// vocabulary (`InvalidArg`, `InUse`, `Shortage`, `BadVaddr`,
/// `MapAlreadyExists`). Not every variant is reachable from every
/// operation; `alloc` only ever produces the first three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    /// The request itself was malformed: zero length, a misaligned
    /// `preferred` address, or a range outside the space's bounds.
    InvalidArg,
    /// `preferred` was requested with `must_fix` and the range is
    /// already occupied.
    InUse,
    /// No gap of the requested size exists anywhere in the address
    /// space.
    Shortage,
    /// The address passed to a query/clear-style operation has nothing
    /// mapped there.
    BadVaddr,
    /// A fixed mapping was requested where one already exists and the
    /// caller didn't ask to replace it.
    MapAlreadyExists,
}

/// An address space's set of non-overlapping virtual memory ranges, plus
/// the `[low, high)` bounds new ranges must fall within.
pub struct VmSpace {
    areas: BTreeSet<VmRange>,
    bounds: VRange,
}

impl VmSpace {
    pub fn new(bounds: VRange) -> Self {
        Self {
            areas: BTreeSet::new(),
            bounds,
        }
    }

    pub fn areas(&self) -> impl Iterator<Item = &VmRange> {
        self.areas.iter()
    }

    pub fn find(&self, addr: VAddr) -> Option<&VmRange> {
        self.areas.get(&VRange::from(addr))
    }

    fn overlapping(&self, range: VRange) -> impl DoubleEndedIterator<Item = &VmRange> {
        self.areas.range(range.into_bounds())
    }

    fn fits_in_bounds(&self, range: VRange) -> bool {
        self.bounds.start() <= range.start() && range.end() <= self.bounds.end()
    }

    /// Finds the lowest address `>= hint` (page-aligned, `len` bytes long)
    /// with no overlap against an existing range, scanning gaps between
    /// neighbors in address order. `hint == VAddr::NULL` starts from the
    /// bottom of the space's bounds.
    fn find_gap(&self, hint: VAddr, len: usize) -> Option<VAddr> {
        let len = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mut candidate = if hint == VAddr::NULL {
            self.bounds.start()
        } else {
            hint.floor()
        };

        loop {
            let probe = VRange::from(candidate).grow(len);
            if !self.fits_in_bounds(probe) {
                return None;
            }

            match self.overlapping(probe).next_back() {
                None => return Some(probe.start()),
                Some(area) => candidate = area.range().end().ceil(),
            }
        }
    }

    /// Implements the three `SpaceAlloc` sub-cases for a preferred
    /// address: if `addr` is null, any gap will do (`find_gap` from the
    /// bottom); if it's set and free, fix the range there; if it's set
    /// but occupied, fall back to the nearest gap at or after it unless
    /// `must_fix` demands the exact address.
    pub fn alloc(
        &mut self,
        preferred: VAddr,
        len: usize,
        must_fix: bool,
        kind: VmRangeKind,
        permission: VmPermission,
    ) -> Result<&VmRange, VmStatus> {
        if len == 0 {
            return Err(VmStatus::InvalidArg);
        }
        if preferred != VAddr::NULL && !preferred.is_page_aligned() {
            return Err(VmStatus::InvalidArg);
        }
        let len = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;

        let start = if preferred == VAddr::NULL {
            self.find_gap(VAddr::NULL, len).ok_or(VmStatus::Shortage)?
        } else {
            let probe = VRange::from(preferred.floor()).grow(len);
            if !self.fits_in_bounds(probe) {
                return Err(VmStatus::InvalidArg);
            }

            if self.overlapping(probe).next().is_none() {
                probe.start()
            } else if must_fix {
                return Err(VmStatus::InUse);
            } else {
                self.find_gap(preferred, len).ok_or(VmStatus::Shortage)?
            }
        };

        let range = VRange::from(start).grow(len);
        let area = VmRange::new(range, kind, permission);
        self.areas.insert(area);
        Ok(self
            .areas
            .get(&range)
            .expect("just-inserted range must be present"))
    }

    /// Removes every range (or range fragment) overlapping `range`,
    /// shrinking partially-overlapped neighbors rather than dropping
    /// them whole. Returns the ranges that existed before the call so
    /// the caller can tear down their backing (unmap pages, drop an
    /// `AnonMap`, etc).
    pub fn free(&mut self, range: VRange) -> alloc::vec::Vec<VmRange> {
        let mut removed = alloc::vec::Vec::new();
        let mut left_remaining = None;
        let mut right_remaining = None;

        self.areas.retain(|area| {
            let Some((left, mid, right)) = area.range().mask_with_checked(&range) else {
                return true;
            };

            removed.push(VmRange::new(mid, area.kind, area.permission));

            match (left, right) {
                (None, None) => false,
                (Some(l), None) => {
                    left_remaining = Some(VmRange::new(l, area.kind, area.permission));
                    false
                }
                (None, Some(r)) => {
                    right_remaining = Some(VmRange::new(r, area.kind, area.permission));
                    false
                }
                (Some(l), Some(r)) => {
                    left_remaining = Some(VmRange::new(l, area.kind, area.permission));
                    right_remaining = Some(VmRange::new(r, area.kind, area.permission));
                    false
                }
            }
        });

        if let Some(area) = left_remaining.take() {
            self.areas.insert(area);
        }
        if let Some(area) = right_remaining.take() {
            self.areas.insert(area);
        }

        removed
    }

    pub fn protect(&mut self, range: VRange, permission: VmPermission) -> bool {
        let Some(area) = self.areas.get(&range) else {
            return false;
        };
        if area.range() != range {
            return false;
        }
        let kind = area.kind;
        self.areas.remove(&range);
        self.areas.insert(VmRange::new(range, kind, permission));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> VmSpace {
        VmSpace::new(VRange::new(VAddr::from(0x1000), VAddr::from(0x1_0000_0000)))
    }

    #[test]
    fn alloc_picks_disjoint_gaps() {
        let mut vm = space();
        let a = vm
            .alloc(VAddr::NULL, PAGE_SIZE, false, VmRangeKind::Anonymous, VmPermission::READ_WRITE)
            .unwrap()
            .range();
        let b = vm
            .alloc(VAddr::NULL, PAGE_SIZE, false, VmRangeKind::Anonymous, VmPermission::READ_WRITE)
            .unwrap()
            .range();
        assert!(!a.overlap_with(&b));
    }

    #[test]
    fn fixed_alloc_rejects_occupied() {
        let mut vm = space();
        let first = vm
            .alloc(VAddr::NULL, PAGE_SIZE, false, VmRangeKind::Anonymous, VmPermission::READ_WRITE)
            .unwrap()
            .range();
        let err = vm
            .alloc(first.start(), PAGE_SIZE, true, VmRangeKind::Anonymous, VmPermission::READ_WRITE)
            .unwrap_err();
        assert_eq!(err, VmStatus::InUse);
    }

    #[test]
    fn zero_length_alloc_is_invalid_arg() {
        let mut vm = space();
        let err = vm
            .alloc(VAddr::NULL, 0, false, VmRangeKind::Anonymous, VmPermission::READ_WRITE)
            .unwrap_err();
        assert_eq!(err, VmStatus::InvalidArg);
    }

    #[test]
    fn misaligned_preferred_addr_is_invalid_arg() {
        let mut vm = space();
        let err = vm
            .alloc(VAddr::from(0x1001), PAGE_SIZE, false, VmRangeKind::Anonymous, VmPermission::READ_WRITE)
            .unwrap_err();
        assert_eq!(err, VmStatus::InvalidArg);
    }

    #[test]
    fn free_shrinks_overlapping_range() {
        let mut vm = space();
        let area = vm
            .alloc(VAddr::NULL, PAGE_SIZE * 4, false, VmRangeKind::Anonymous, VmPermission::READ_WRITE)
            .unwrap()
            .range();

        let cut = VRange::new(area.start() + PAGE_SIZE, area.start() + PAGE_SIZE * 2);
        let removed = vm.free(cut);
        assert_eq!(removed.len(), 1);
        assert!(vm.find(area.start()).is_some());
        assert!(vm.find(area.start() + PAGE_SIZE * 3).is_some());
        assert!(vm.find(area.start() + PAGE_SIZE).is_none());
    }
}
