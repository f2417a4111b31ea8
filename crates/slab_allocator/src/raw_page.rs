//! `SlabRawPage` for the kernel's page handle. Slab bookkeeping piggybacks
//! on `PageInfo`'s existing `link` field the same way the buddy allocator
//! reuses it for free lists -- a page is never `BUDDY` and slab-owned at
//! once -- and on the `PageOwner::Slab` variant for size/used-count state.
//! The free list of object slots is threaded through the page's own bytes,
//! reached through `ArchPhysAccess`.
use core::ptr::NonNull;

use eonix_hal::mm::ArchPhysAccess;
use eonix_mm::address::{AddrOps as _, PAddr, PhysAccess as _};
use eonix_mm::paging::{PageFlags, PageInfo, PageOwner, RawPagePtr, PAGE_SIZE, PFN};
use intrusive_list::Link;

use crate::SlabRawPage;

fn page_base_ptr(page: RawPagePtr) -> NonNull<u8> {
    let pfn: PFN = page.into();
    let paddr = PAddr::from(pfn);
    unsafe { ArchPhysAccess::as_ptr::<u8>(paddr) }
}

fn slot_count(object_size: u32) -> u32 {
    PAGE_SIZE as u32 / object_size
}

fn slot_ptr(base: NonNull<u8>, index: u32, object_size: u32) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(base.as_ptr().add((index * object_size) as usize)) }
}

unsafe fn write_next(slot: NonNull<u8>, next: Option<NonNull<u8>>) {
    let raw = next.map_or(0usize, |p| p.as_ptr() as usize);
    unsafe { (slot.as_ptr() as *mut usize).write(raw) }
}

unsafe fn read_next(slot: NonNull<u8>) -> Option<NonNull<u8>> {
    let raw = unsafe { (slot.as_ptr() as *const usize).read() };
    NonNull::new(raw as *mut u8)
}

impl SlabRawPage for RawPagePtr {
    unsafe fn from_link(link: &mut Link) -> Self {
        // `link` is `PageInfo`'s first field, so the container starts at
        // the same address.
        let ptr = link as *mut Link as *mut PageInfo;
        unsafe { RawPagePtr::new(NonNull::new_unchecked(ptr)) }
    }

    unsafe fn get_link(&self) -> &mut Link {
        &mut self.as_mut().link
    }

    fn slab_init(&self, object_size: u32) {
        let count = slot_count(object_size);
        let base = page_base_ptr(*self);
        for i in 0..count {
            let slot = slot_ptr(base, i, object_size);
            let next = (i + 1 < count).then(|| slot_ptr(base, i + 1, object_size));
            unsafe { write_next(slot, next) };
        }

        self.flags().set(PageFlags::SLAB);
        unsafe {
            *self.owner() = PageOwner::Slab {
                object_size,
                used: 0,
                free_head: Some(slot_ptr(base, 0, object_size)),
            };
        }
    }

    fn is_emtpy(&self) -> bool {
        match unsafe { self.owner() } {
            PageOwner::Slab { used, .. } => *used == 0,
            _ => false,
        }
    }

    fn is_full(&self) -> bool {
        match unsafe { self.owner() } {
            PageOwner::Slab {
                object_size, used, ..
            } => *used == slot_count(*object_size),
            _ => false,
        }
    }

    fn in_which(ptr: *mut u8) -> Self {
        let ptr = NonNull::new(ptr).expect("null pointer passed to SlabRawPage::in_which");
        let paddr = unsafe { ArchPhysAccess::from_ptr(ptr) }.floor();
        RawPagePtr::from(PFN::from(paddr))
    }

    fn alloc_slot(&self) -> *mut u8 {
        let owner = unsafe { self.owner() };
        let PageOwner::Slab { used, free_head, .. } = owner else {
            panic!("alloc_slot called on a non-slab page");
        };

        let slot = free_head.take().expect("slab page has no free slots");
        *free_head = unsafe { read_next(slot) };
        *used += 1;
        slot.as_ptr()
    }

    fn dealloc_slot(&self, ptr: *mut u8) {
        let owner = unsafe { self.owner() };
        let PageOwner::Slab { used, free_head, .. } = owner else {
            panic!("dealloc_slot called on a non-slab page");
        };

        let slot = NonNull::new(ptr).expect("null pointer passed to SlabRawPage::dealloc_slot");
        unsafe { write_next(slot, *free_head) };
        *free_head = Some(slot);
        *used -= 1;
    }
}
