use core::marker::PhantomData;

use eonix_mm::paging::{PageAlloc, RawPagePtr, PAGE_SIZE};
use intrusive_list::List;

use crate::SlabRawPage as _;

pub(crate) struct SlabCache<A> {
    empty_list: List,
    partial_list: List,
    full_list: List,
    object_size: u32,
    _alloc: PhantomData<A>,
}

impl<A> SlabCache<A>
where
    A: PageAlloc,
{
    pub(crate) const fn new(object_size: u32) -> Self {
        // avoid unnecessary branch in alloc and dealloc
        assert!(object_size as usize <= PAGE_SIZE / 2);

        Self {
            empty_list: List::new(),
            partial_list: List::new(),
            full_list: List::new(),
            object_size,
            _alloc: PhantomData,
        }
    }

    pub(crate) fn alloc(&mut self) -> *mut u8 {
        if !self.partial_list.is_empty() {
            let page = unsafe {
                RawPagePtr::from_link(
                    self.partial_list
                        .head()
                        .expect("partial pages should not be empty"),
                )
            };

            let ptr = page.alloc_slot();
            if page.is_full() {
                self.partial_list.remove(unsafe { page.get_link() });
                self.full_list.insert(unsafe { page.get_link() });
            }
            return ptr;
        }

        if !self.empty_list.is_empty() {
            let page = unsafe {
                RawPagePtr::from_link(
                    self.empty_list
                        .head()
                        .expect("empty pages should not be empty"),
                )
            };

            let ptr = page.alloc_slot();
            self.empty_list.remove(unsafe { page.get_link() });
            self.partial_list.insert(unsafe { page.get_link() });
            return ptr;
        }

        let page = A::alloc_order(0).expect("slab_cache get page fail!");
        page.slab_init(self.object_size);
        let ptr = page.alloc_slot();
        self.partial_list.insert(unsafe { page.get_link() });
        ptr
    }

    pub(crate) fn dealloc(&mut self, ptr: *mut u8) {
        let page = RawPagePtr::in_which(ptr);

        if page.is_full() {
            self.full_list.remove(unsafe { page.get_link() });
            self.partial_list.insert(unsafe { page.get_link() });
        }

        page.dealloc_slot(ptr);

        if page.is_emtpy() {
            self.partial_list.remove(unsafe { page.get_link() });
            self.empty_list.insert(unsafe { page.get_link() });
        }
    }
}
