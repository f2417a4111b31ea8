//! Backing storage for every [`eonix_runtime::thread::Thread`] this kernel
//! core creates: the idle thread on each core, and whatever work threads
//! the scheduling subsystem spins up.
//!
//! Grounded on the teacher's own `kernel/task/kernel_stack.rs` (a single
//! fixed-order allocation exposing only `get_bottom()`), adapted onto this
//! workspace's global kernel heap (`src/heap.rs`) in place of the teacher's
//! `FolioOwned` -- once the heap's `#[global_allocator]` is wired up there's
//! no need to juggle `Folio`/`PFN` by hand just to back a stack.
use core::alloc::Layout;
use core::ptr::NonNull;

use eonix_mm::paging::PAGE_SIZE;
use eonix_runtime::stack::Stack;

/// Same size as the teacher's `KERNEL_STACK_ORDER = 7` (`2^7` pages).
const STACK_SIZE: usize = 128 * PAGE_SIZE;

pub struct KernelStack {
    base: NonNull<u8>,
}

// SAFETY: `base` is the sole owner of an allocation obtained from the
// global allocator; nothing else ever reads or writes through it besides
// the thread that owns this stack.
unsafe impl Send for KernelStack {}

impl KernelStack {
    fn layout() -> Layout {
        Layout::from_size_align(STACK_SIZE, PAGE_SIZE).unwrap()
    }

    pub fn new() -> Self {
        let base = unsafe { alloc::alloc::alloc(Self::layout()) };
        Self {
            base: NonNull::new(base).expect("out of memory allocating a kernel stack"),
        }
    }
}

impl Stack for KernelStack {
    fn get_bottom(&self) -> usize {
        unsafe { self.base.as_ptr().add(STACK_SIZE) as usize }
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.base.as_ptr(), Self::layout()) }
    }
}
