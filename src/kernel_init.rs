//! Early bring-up, before the scheduler or anything depending on `alloc`
//! can run: discovers present RAM, builds the PFN-DB (`spec.md` §4.1 /
//! `SPEC_FULL.md` §1.1), seeds the page allocator, and folds the boot
//! allocator's own pages back into it.
//!
//! Grounded on the teacher's `kernel_init.rs::setup_memory` (same shape:
//! map a kernel-VA array sized for the highest present PFN, zero it, mark
//! present ranges, then donate the boot-time allocator's leftover pages)
//! adapted onto this workspace's PFN-DB (`eonix_mm::paging::page_info`)
//! and `BuddyAllocator` in place of the teacher's `RawPage`/
//! `GlobalPageAlloc`.
use eonix_hal::bootstrap::BootStrapData;
use eonix_hal::mm::ArchMemory;
use eonix_hal::traits::mm::Memory;
use eonix_mm::address::{Addr as _, AddrOps as _, VAddr, VRange};
use eonix_mm::paging::{init_page_info_table, PageInfo, PAGE_SIZE, PFN};

/// Kernel VA the PFN-DB array is mapped at. Below `V_KERNEL_BSS_START`
/// (`0xffff_ffff_c020_0000` on x86_64) with plenty of headroom for any
/// RAM size this kernel is realistically booted with.
const V_KERNEL_PAGE_ARRAY_START: VAddr = VAddr::from(0xffff_ff80_4000_0000);

#[cfg(target_arch = "x86_64")]
fn map_page_array(data: &BootStrapData, range: VRange) {
    use eonix_hal::mm::PageAccessImpl;
    use eonix_mm::page_table::{PageAttribute, PagingMode as _, PTE as _};
    use eonix_mm::paging::{Folio as _, FrameAlloc as _};

    let alloc = data.get_alloc().expect("early page allocator not present");

    eonix_hal::mm::with_global_page_table(alloc.clone(), PageAccessImpl, |table| {
        for pte in table.iter_kernel(range) {
            let attr = PageAttribute::PRESENT
                | PageAttribute::WRITE
                | PageAttribute::READ
                | PageAttribute::GLOBAL
                | PageAttribute::ACCESSED
                | PageAttribute::DIRTY;

            let page = alloc.alloc().expect("out of early memory");
            pte.set(page.into_raw(), attr.into());
        }
    });
}

#[cfg(not(target_arch = "x86_64"))]
fn map_page_array(data: &BootStrapData, range: VRange) {
    use eonix_hal::mm::{ArchPagingMode, ArchPhysAccess, GLOBAL_PAGE_TABLE};
    use eonix_mm::page_table::{PageAttribute, PageTable, PagingMode as _, PTE as _};
    use eonix_mm::paging::{BasicFolio, Folio as _, FrameAlloc as _, PFN};

    let alloc = data.get_alloc().expect("early page allocator not present");

    // `GLOBAL_PAGE_TABLE` bakes in `NoAlloc`, which can't materialize the
    // new intermediate levels this range needs; wrap the same root table
    // with the early bootstrap allocator for the duration of this call,
    // the same trick `eonix_hal::mm::with_global_page_table` plays on
    // x86_64.
    let table = PageTable::<ArchPagingMode, _, _>::new(
        BasicFolio::new(PFN::from(GLOBAL_PAGE_TABLE.addr()), 0),
        alloc.clone(),
        ArchPhysAccess,
    );

    for pte in table.iter_kernel(range) {
        let attr = PageAttribute::PRESENT
            | PageAttribute::WRITE
            | PageAttribute::READ
            | PageAttribute::GLOBAL
            | PageAttribute::ACCESSED
            | PageAttribute::DIRTY;

        let page = alloc.alloc().expect("out of early memory");
        pte.set(page.into_raw(), attr.into());
    }

    core::mem::forget(table);
}

/// Builds the PFN-DB over every present frame, seeds the buddy allocator
/// with free RAM, and donates the boot-time early-stack range and
/// whatever's left of the bootstrap bump allocator to it.
pub fn setup_memory(data: &mut BootStrapData) {
    let addr_max = ArchMemory::present_ram()
        .map(|range| range.end())
        .max()
        .expect("no free memory reported by the bootloader");

    let pfn_max = PFN::from(addr_max.ceil());
    let page_array_bytes = usize::from(pfn_max) * size_of::<PageInfo>();
    let page_array_pages = page_array_bytes.div_ceil(PAGE_SIZE);

    let page_array_range =
        VRange::from(V_KERNEL_PAGE_ARRAY_START).grow(PAGE_SIZE * page_array_pages);

    map_page_array(data, page_array_range);

    unsafe {
        // SAFETY: `page_array_range` was just mapped with sufficient length.
        core::ptr::write_bytes(
            V_KERNEL_PAGE_ARRAY_START.addr() as *mut PageInfo,
            0,
            page_array_pages * PAGE_SIZE / size_of::<PageInfo>(),
        );

        // SAFETY: `init_page_info_table`'s own contract asks for
        // `count` zero-initialised slots; `write_bytes` just produced
        // exactly that.
        init_page_info_table(
            core::ptr::NonNull::new(V_KERNEL_PAGE_ARRAY_START.addr() as *mut PageInfo).unwrap(),
            PFN::from_val(0),
            usize::from(pfn_max),
        );
    }

    for range in ArchMemory::present_ram() {
        buddy_allocator::BuddyAllocator::create_pages(range.start(), range.end());
    }

    if let Some(early_alloc) = data.take_alloc() {
        for range in early_alloc.into_iter() {
            buddy_allocator::BuddyAllocator::create_pages(range.start(), range.end());
        }
    }
}
