//! Kernel heap: `#[global_allocator]` backing every `alloc::` use in the
//! crate. Grounded on the teacher's `kernel/mem/allocator.rs` shape --
//! small requests go through a fixed-size-class slab allocator, large ones
//! go straight to the page allocator -- adapted onto this workspace's
//! `buddy_allocator`/`slab_allocator`/PFN-DB primitives in place of the
//! teacher's `GlobalPageAlloc`/`RawPage`/`Page` trio.
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use buddy_allocator::BuddyAllocator;
use eonix_hal::mm::ArchPhysAccess;
use eonix_mm::address::{PAddr, PhysAccess as _};
use eonix_mm::paging::{PageAlloc as _, PAGE_SIZE_BITS, PFN};
use eonix_sync::LazyLock;
use slab_allocator::SlabAllocator;

/// Size classes `8, 16, .. 2048` (one slab cache per power of two), same
/// split point as the teacher's allocator: anything larger is handed
/// whole pages instead of carved out of a slab.
const SLAB_CACHE_COUNT: usize = 9;
const LARGE_ALLOC_THRESHOLD: usize = 2048;

static SLAB_ALLOCATOR: LazyLock<SlabAllocator<BuddyAllocator, SLAB_CACHE_COUNT>> =
    LazyLock::new(SlabAllocator::new);

struct KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(layout.align()).next_power_of_two();

        if size <= LARGE_ALLOC_THRESHOLD {
            return SLAB_ALLOCATOR.alloc(size);
        }

        let order = (size >> PAGE_SIZE_BITS).trailing_zeros();
        let Some(page) = BuddyAllocator::alloc_order(order) else {
            return core::ptr::null_mut();
        };

        let paddr = PAddr::from(PFN::from(page));
        unsafe { ArchPhysAccess::as_ptr::<u8>(paddr) }.as_ptr()
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let size = layout.size().max(layout.align()).next_power_of_two();

        if size <= LARGE_ALLOC_THRESHOLD {
            SLAB_ALLOCATOR.dealloc(ptr, size);
            return;
        }

        let paddr = unsafe { ArchPhysAccess::from_ptr(NonNull::new_unchecked(ptr)) };
        let page = eonix_mm::paging::RawPagePtr::from(PFN::from(paddr));
        unsafe { BuddyAllocator::dealloc(page) };
    }
}

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap;
