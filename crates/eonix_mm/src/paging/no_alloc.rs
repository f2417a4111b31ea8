use super::{BasicFolio, PFN};
use crate::page_table::PageTableAlloc;

/// A [`PageTableAlloc`] for page tables whose every intermediate level is
/// already present at construction time (the boot-time global kernel page
/// table, built entirely by arch-specific bootstrap code before any
/// allocator exists). Walking such a table never needs to materialize a
/// new level, so [`alloc`](PageTableAlloc::alloc) is unreachable; only
/// wrapping an already-known child PFN back into a [`BasicFolio`] is ever
/// asked of it.
#[derive(Clone, Copy)]
pub struct NoAlloc;

impl PageTableAlloc for NoAlloc {
    type Folio = BasicFolio;

    fn alloc(&self) -> Self::Folio {
        unreachable!("NoAlloc page table needed to allocate a new level")
    }

    unsafe fn from_raw(&self, pfn: PFN) -> Self::Folio {
        BasicFolio::new(pfn, 0)
    }
}
