use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::{RawPage as RawPageTrait, PFN};
use intrusive_list::Link;

/// Bitfield state attached to every [`PageInfo`]. Distinct from the page's
/// *owner*, which says what the page is currently used for.
pub struct PageFlags(AtomicU32);

impl PageFlags {
    pub const PRESENT: u32 = 1 << 0;
    pub const FREE: u32 = 1 << 1;
    pub const BUDDY: u32 = 1 << 2;
    pub const SLAB: u32 = 1 << 3;
    pub const LOCAL: u32 = 1 << 4;
    pub const WIRED: u32 = 1 << 5;
    pub const POISONED: u32 = 1 << 6;

    const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn has(&self, flag: u32) -> bool {
        self.0.load(Ordering::Relaxed) & flag == flag
    }

    pub fn set(&self, flag: u32) {
        self.0.fetch_or(flag, Ordering::Relaxed);
    }

    pub fn clear(&self, flag: u32) {
        self.0.fetch_and(!flag, Ordering::Relaxed);
    }
}

/// Owner-specific bookkeeping for a physical frame. Exactly one variant is
/// meaningful at a time, selected by which list/object currently owns the
/// frame; see `PageInfo`'s doc comment for the invariant.
pub enum PageOwner {
    /// Not currently owned by anything; only valid while `PageFlags::FREE`.
    None,
    /// Page-table frame: number of present entries, used to decide whether
    /// an intermediate table may be reclaimed on unmap.
    Mmu { valid_ptes: u32 },
    /// Backing an `AnonPage` slot.
    Anon { slot: usize },
    /// Backing a slab cache page; `object_size` mirrors what
    /// `slab_init` was called with. `free_head` threads the page's free
    /// object slots into a singly-linked list stored in the slots
    /// themselves (see `slab_allocator::raw_page`).
    Slab {
        object_size: u32,
        used: u32,
        free_head: Option<NonNull<u8>>,
    },
}

/// One entry of the PFN-DB: metadata the kernel keeps for every physical
/// frame from boot onward. Never resized, never destroyed.
pub struct PageInfo {
    pub link: Link,
    pub order: u32,
    pub flags: PageFlags,
    pub refcount: AtomicUsize,
    pub owner: UnsafeCell<PageOwner>,
}

impl PageInfo {
    const fn new() -> Self {
        Self {
            link: Link::new(),
            order: 0,
            flags: PageFlags::new(),
            refcount: AtomicUsize::new(0),
            owner: UnsafeCell::new(PageOwner::None),
        }
    }
}

unsafe impl Send for PageInfo {}
unsafe impl Sync for PageInfo {}

/// The PFN-DB itself: a contiguous array of `PageInfo`, one per frame,
/// installed once during early bring-up (§4.1 step 4a) by mapping it at a
/// fixed virtual base and calling [`PageInfoTable::init`].
struct PageInfoTable {
    base: NonNull<PageInfo>,
    base_pfn: PFN,
    count: usize,
}

unsafe impl Send for PageInfoTable {}
unsafe impl Sync for PageInfoTable {}

static mut TABLE: PageInfoTable = PageInfoTable {
    base: NonNull::dangling(),
    base_pfn: PFN::from_val(0),
    count: 0,
};

impl PageInfoTable {
    /// # Safety
    /// `array` must point to `count` zero-initialised, live-forever
    /// `PageInfo` slots, already mapped read-write. Must be called exactly
    /// once, before any other function in this module, with preemption
    /// disabled and no other core running.
    unsafe fn init(array: NonNull<PageInfo>, base_pfn: PFN, count: usize) {
        unsafe {
            TABLE = PageInfoTable {
                base: array,
                base_pfn,
                count,
            };
        }
    }
}

/// Installs the PFN-DB. Called once from early bring-up after the database
/// region has been mapped.
///
/// # Safety
/// See [`PageInfoTable::init`].
pub unsafe fn init_page_info_table(array: NonNull<PageInfo>, base_pfn: PFN, count: usize) {
    unsafe { PageInfoTable::init(array, base_pfn, count) }
}

#[allow(static_mut_refs)]
fn table() -> &'static PageInfoTable {
    unsafe { &*core::ptr::addr_of!(TABLE) }
}

/// A pointer-like handle to one `PageInfo` slot, convertible to/from `PFN`.
/// This is the concrete `RawPage` the buddy and slab allocators manage.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawPagePtr(NonNull<PageInfo>);

impl RawPagePtr {
    pub const fn new(ptr: NonNull<PageInfo>) -> Self {
        Self(ptr)
    }

    /// # Safety
    /// Doing arithmetic on the pointer returned causes immediate UB; only
    /// use it to compute an `offset_from` against another `RawPagePtr`.
    pub const unsafe fn as_ptr(self) -> *mut PageInfo {
        self.0.as_ptr()
    }

    pub const fn as_ref<'a>(self) -> &'a PageInfo {
        unsafe { &*self.as_ptr() }
    }

    pub const fn as_mut<'a>(self) -> &'a mut PageInfo {
        unsafe { &mut *self.as_ptr() }
    }

    pub fn order(&self) -> u32 {
        self.as_ref().order
    }

    pub fn set_order(&self, order: u32) {
        self.as_mut().order = order;
    }

    pub fn flags(&self) -> &PageFlags {
        &self.as_ref().flags
    }

    pub fn refcount(&self) -> &AtomicUsize {
        &self.as_ref().refcount
    }

    /// # Safety
    /// `self` and the owner fields it exposes must not be aliased mutably
    /// elsewhere at the same time.
    pub unsafe fn owner(&self) -> &mut PageOwner {
        unsafe { &mut *self.as_ref().owner.get() }
    }

    /// Frame at `self + count` pages, same table.
    pub fn offset(self, count: usize) -> Self {
        Self(unsafe { NonNull::new_unchecked(self.as_ptr().add(count)) })
    }
}

impl From<RawPagePtr> for PFN {
    fn from(value: RawPagePtr) -> Self {
        let t = table();
        let idx = unsafe { value.as_ptr().offset_from(t.base.as_ptr()) as usize };
        t.base_pfn + idx
    }
}

impl From<PFN> for RawPagePtr {
    fn from(pfn: PFN) -> Self {
        let t = table();
        let idx = usize::from(pfn) - usize::from(t.base_pfn);
        assert!(idx < t.count, "PFN out of PFN-DB range");
        Self::new(unsafe { NonNull::new_unchecked(t.base.as_ptr().add(idx)) })
    }
}

impl RawPageTrait for RawPagePtr {
    fn order(&self) -> u32 {
        self.order()
    }

    fn refcount(&self) -> &AtomicUsize {
        self.refcount()
    }

    fn is_present(&self) -> bool {
        self.flags().has(PageFlags::PRESENT)
    }
}

/// A static, globally-reachable page allocator: alloc/dealloc of
/// `RawPagePtr`s at a given order, plus an ownership query used by
/// allocators layered on top (slab, kernel heap) to validate frees.
pub trait PageAlloc {
    fn alloc_order(order: u32) -> Option<RawPagePtr>;

    /// # Safety
    /// `page_ptr` must have been returned by a matching `alloc_order` and
    /// not freed since, and must have `refcount() == 0`.
    unsafe fn dealloc(page_ptr: RawPagePtr);

    /// # Safety
    /// Only meaningful while no concurrent alloc/dealloc on `page_ptr` is
    /// racing the check.
    unsafe fn has_management_over(page_ptr: RawPagePtr) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::alloc::Layout;

    fn install_table(count: usize) -> *mut PageInfo {
        let layout = Layout::array::<PageInfo>(count).unwrap();
        let ptr = unsafe { alloc_test_storage(layout) } as *mut PageInfo;
        for i in 0..count {
            unsafe { ptr.add(i).write(PageInfo::new()) };
        }
        unsafe {
            init_page_info_table(NonNull::new(ptr).unwrap(), PFN::from_val(0x1000), count);
        }
        ptr
    }

    // Tests in this module allocate their own backing storage rather than
    // using the global allocator, since `eonix_mm` is `no_std` with no
    // guaranteed `alloc` crate wired up for unit tests.
    unsafe fn alloc_test_storage(layout: Layout) -> *mut u8 {
        unsafe { std::alloc::alloc_zeroed(layout) }
    }

    extern crate std;

    #[test]
    fn pfn_roundtrip() {
        install_table(16);
        let ptr = RawPagePtr::from(PFN::from_val(0x1004));
        let pfn: PFN = ptr.into();
        assert_eq!(pfn, PFN::from_val(0x1004));
    }

    #[test]
    fn flags_set_clear() {
        install_table(4);
        let ptr = RawPagePtr::from(PFN::from_val(0x1000));
        assert!(!ptr.flags().has(PageFlags::PRESENT));
        ptr.flags().set(PageFlags::PRESENT);
        assert!(ptr.flags().has(PageFlags::PRESENT));
        ptr.flags().clear(PageFlags::PRESENT);
        assert!(!ptr.flags().has(PageFlags::PRESENT));
    }
}
