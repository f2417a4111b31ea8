//! The hardware address translation (HAT) abstraction: the boundary every
//! other VM module (`vm`, `amap`, `pma_cache`) programs against instead of
//! touching page table entries directly. A concrete `Hat` is a thin,
//! generation-counted wrapper around [`crate::page_table::PageTable`].
use crate::address::{AddrOps as _, VAddr, VRange};
use crate::page_table::{PageAttribute, PageTable, PageTableAlloc, PagingMode, PTE};
use crate::paging::{PageAccess, PFN};

/// Errors the HAT layer itself distinguishes, per `spec.md` §7's
/// "recoverable programming errors" category -- never a panic, always
/// returned to the caller to decide what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuError {
    /// `va` wasn't page-aligned.
    InvalidArg,
    /// Nothing is mapped at `va` (or no page-table entry could be reached
    /// for it at all, e.g. it falls outside any paging-mode-covered
    /// region).
    BadVaddr,
    /// `MapAdd` found a present translation already at `va`.
    MapAlreadyExists,
}

/// Protection/behavior bits requested for a mapping. Mirrors
/// [`PageAttribute`]'s boolean surface but is the stable, HAT-level
/// vocabulary callers build against; `PageTableHat` is what translates it
/// into the arch-specific `PageAttribute` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HatFlags {
    pub write: bool,
    pub execute: bool,
    pub user: bool,
    pub global: bool,
    pub copy_on_write: bool,
}

impl HatFlags {
    pub const fn new() -> Self {
        Self {
            write: false,
            execute: false,
            user: false,
            global: false,
            copy_on_write: false,
        }
    }
}

/// One mapping found by [`Hat::map_query`]: the frame it resolves to, the
/// flags it was installed with, and whether the entry is actually present
/// (a query can hit a valid-but-not-present entry, e.g. a swapped-out or
/// lazily-mapped page).
#[derive(Debug, Clone, Copy)]
pub struct HatMapping {
    pub pfn: PFN,
    pub flags: HatFlags,
    pub present: bool,
}

/// The operations every address space representation needs from its page
/// tables: add/remove/query/atomically-update a single-page mapping,
/// create and tear down whole address spaces, and temporarily borrow
/// another frame's contents through a fixed "temp map" window (used by the
/// page-fault and CoW paths to read/write a frame that isn't mapped
/// anywhere else yet).
pub trait Hat: Sized {
    /// Installs a mapping for `va` -> `pfn`. Fails with `MapAlreadyExists`
    /// if a present translation is already there -- callers that want to
    /// replace one use `map_clear` then `map_add`, or `map_sync` to update
    /// an existing mapping's target/permissions in place. Bumps the
    /// generation counter.
    fn map_add(&self, va: VAddr, pfn: PFN, flags: HatFlags) -> Result<(), MmuError>;

    /// Removes whatever is mapped at `va`, returning it if present. Bumps
    /// the generation counter.
    fn map_clear(&self, va: VAddr) -> Result<HatMapping, MmuError>;

    /// Reads back the current mapping at `va` without modifying it.
    fn map_query(&self, va: VAddr) -> Result<HatMapping, MmuError>;

    /// Atomically updates the permission and/or target of an existing
    /// mapping at `va` (`MapSync`, spec §4.3): `new_pfn`/`new_flags` are
    /// each applied if `Some`, left as-is if `None`. Returns the mapping as
    /// it was just before the update. Fails with `BadVaddr` if nothing is
    /// currently mapped at `va`. Bumps the generation counter. Does not
    /// flush the TLB; callers batch that themselves (the same convention
    /// `map_clear` documents).
    fn map_sync(
        &self,
        va: VAddr,
        new_pfn: Option<PFN>,
        new_flags: Option<HatFlags>,
    ) -> Result<HatMapping, MmuError>;

    /// Monotonically increasing counter bumped by every `map_add`/
    /// `map_clear`/`map_sync`. `VmSpace` and `AnonMap` use this to detect
    /// "did the mapping under me change while I was faulting it in" races
    /// without taking a lock across the whole fault path.
    fn generation(&self) -> u64;

    /// `HatCreate`: builds a new address space that inherits the current
    /// kernel half (spec §4.3) and starts with an empty user half.
    fn hat_create(&self) -> Self;

    /// `HatDestroy`: tears down this address space, walking and freeing
    /// every owned intermediate frame. Consumes `self` rather than take
    /// `&self`, since nothing may use the map again afterwards.
    fn hat_destroy(self);
}

/// A frame temporarily visible at a fixed kernel virtual address for the
/// duration of the guard, used by fault handlers that need to read or
/// zero a physical frame that has no virtual mapping of its own yet.
pub struct TempMap<'a, H: Hat> {
    hat: &'a H,
    va: VAddr,
}

impl<'a, H: Hat> TempMap<'a, H> {
    pub fn addr(&self) -> VAddr {
        self.va
    }
}

impl<'a, H: Hat> Drop for TempMap<'a, H> {
    fn drop(&mut self) {
        let _ = self.hat.map_clear(self.va);
    }
}

use core::sync::atomic::{AtomicU64, Ordering};

/// Concrete `Hat` backed by a real [`PageTable`]. `temp_va` is a single
/// fixed slot reserved by the arch layer for [`Hat::set_temp_map`];
/// nesting two temp maps on the same core is a logic error and panics.
pub struct PageTableHat<'a, M, A, X>
where
    M: PagingMode,
    M::Entry: 'a,
    A: PageTableAlloc,
    X: PageAccess,
{
    table: PageTable<'a, M, A, X>,
    temp_va: VAddr,
    generation: AtomicU64,
}

impl<'a, M, A, X> PageTableHat<'a, M, A, X>
where
    M: PagingMode,
    M::Entry: 'a,
    A: PageTableAlloc,
    X: PageAccess,
{
    pub fn new(table: PageTable<'a, M, A, X>, temp_va: VAddr) -> Self {
        Self {
            table,
            temp_va,
            generation: AtomicU64::new(0),
        }
    }

    fn to_page_attr(flags: HatFlags) -> <M::Entry as PTE>::Attr {
        <M::Entry as PTE>::Attr::new()
            .present(true)
            .write(flags.write)
            .execute(flags.execute)
            .user(flags.user)
            .global(flags.global)
            .copy_on_write(flags.copy_on_write)
    }

    fn from_page_attr(attr: <M::Entry as PTE>::Attr) -> HatFlags {
        HatFlags {
            write: attr.is_write(),
            execute: attr.is_execute(),
            user: attr.is_user(),
            global: attr.is_global(),
            copy_on_write: attr.is_copy_on_write(),
        }
    }

    fn entry_for(&self, va: VAddr) -> Option<&mut M::Entry> {
        let range = VRange::from(va).grow(1);
        self.table
            .iter_user(range)
            .chain(self.table.iter_kernel(range))
            .next()
    }

    /// Maps `pfn` at this HAT's reserved temp-map slot and returns a guard
    /// that tears the mapping down on drop.
    pub fn set_temp_map(&self, pfn: PFN, flags: HatFlags) -> TempMap<'_, Self> {
        Hat::map_add(self, self.temp_va, pfn, flags)
            .expect("the arch-reserved temp-map slot must always be mappable");
        TempMap {
            hat: self,
            va: self.temp_va,
        }
    }
}

impl<'a, M, A, X> Hat for PageTableHat<'a, M, A, X>
where
    M: PagingMode,
    M::Entry: 'a,
    A: PageTableAlloc,
    X: PageAccess,
{
    fn map_add(&self, va: VAddr, pfn: PFN, flags: HatFlags) -> Result<(), MmuError> {
        if !va.is_page_aligned() {
            return Err(MmuError::InvalidArg);
        }
        let entry = self.entry_for(va).ok_or(MmuError::BadVaddr)?;
        let (_, existing) = entry.get();
        if existing.is_present() {
            return Err(MmuError::MapAlreadyExists);
        }
        entry.set(pfn, Self::to_page_attr(flags));
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn map_clear(&self, va: VAddr) -> Result<HatMapping, MmuError> {
        if !va.is_page_aligned() {
            return Err(MmuError::InvalidArg);
        }
        let entry = self.entry_for(va).ok_or(MmuError::BadVaddr)?;
        let (pfn, attr) = entry.take();
        if !attr.is_present() && !attr.is_mapped() {
            return Err(MmuError::BadVaddr);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(HatMapping {
            pfn,
            flags: Self::from_page_attr(attr),
            present: attr.is_present(),
        })
    }

    fn map_query(&self, va: VAddr) -> Result<HatMapping, MmuError> {
        if !va.is_page_aligned() {
            return Err(MmuError::InvalidArg);
        }
        let entry = self.entry_for(va).ok_or(MmuError::BadVaddr)?;
        let (pfn, attr) = entry.get();
        if !attr.is_present() && !attr.is_mapped() {
            return Err(MmuError::BadVaddr);
        }
        Ok(HatMapping {
            pfn,
            flags: Self::from_page_attr(attr),
            present: attr.is_present(),
        })
    }

    fn map_sync(
        &self,
        va: VAddr,
        new_pfn: Option<PFN>,
        new_flags: Option<HatFlags>,
    ) -> Result<HatMapping, MmuError> {
        if !va.is_page_aligned() {
            return Err(MmuError::InvalidArg);
        }
        let entry = self.entry_for(va).ok_or(MmuError::BadVaddr)?;
        let (pfn, attr) = entry.get();
        if !attr.is_present() && !attr.is_mapped() {
            return Err(MmuError::BadVaddr);
        }

        let new_pfn = new_pfn.unwrap_or(pfn);
        let new_attr = match new_flags {
            Some(flags) => Self::to_page_attr(flags),
            None => attr,
        };
        entry.set(new_pfn, new_attr);
        self.generation.fetch_add(1, Ordering::AcqRel);

        Ok(HatMapping {
            pfn,
            flags: Self::from_page_attr(attr),
            present: attr.is_present(),
        })
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn hat_create(&self) -> Self {
        let new_table = self.table.clone_in(self.table.alloc().clone());
        Self::new(new_table, self.temp_va)
    }

    fn hat_destroy(self) {
        // `self.table`'s own `Drop` impl (`PageTable::drop_page_table_recursive`)
        // walks every `PRESENT | USER` intermediate entry and frees it;
        // nothing further is needed here.
    }
}
