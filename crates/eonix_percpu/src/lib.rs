#![no_std]

extern crate alloc;

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(target_arch = "x86_64")]
pub use eonix_percpu_macros::define_percpu_x86_64 as define_percpu;

#[cfg(target_arch = "x86_64")]
pub use eonix_percpu_macros::define_percpu_shared_x86_64 as define_percpu_shared;

#[cfg(target_arch = "riscv64")]
pub use eonix_percpu_macros::define_percpu_riscv64 as define_percpu;

#[cfg(target_arch = "riscv64")]
pub use eonix_percpu_macros::define_percpu_shared_riscv64 as define_percpu_shared;

#[cfg(target_arch = "loongarch64")]
pub use eonix_percpu_macros::define_percpu_loongarch64 as define_percpu;

#[cfg(target_arch = "loongarch64")]
pub use eonix_percpu_macros::define_percpu_shared_loongarch64 as define_percpu_shared;

/// Upper bound on the number of cores this kernel can boot. Only used to
/// size the static table below; raising it costs a pointer per entry.
pub const MAX_CPUS: usize = 256;

static AREAS: [AtomicUsize; MAX_CPUS] = [const { AtomicUsize::new(0) }; MAX_CPUS];
static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" {
    fn PERCPU_DATA_START();
    fn PERCPU_DATA_END();
}

/// A per-core copy of the `.percpu` linker section, backing every
/// `#[define_percpu]`/`#[define_percpu_shared]` variable on one core.
pub struct PercpuArea {
    pointer: NonNull<u8>,
}

impl PercpuArea {
    pub fn layout() -> Layout {
        let size = PERCPU_DATA_END as usize - PERCPU_DATA_START as usize;
        Layout::from_size_align(size.max(1), 64).expect("bad `.percpu` section layout")
    }

    /// Allocates a fresh copy of the `.percpu` template. `alloc` receives
    /// the section layout and returns backing storage for it.
    pub fn new(alloc: impl FnOnce(Layout) -> *mut u8) -> Self {
        let layout = Self::layout();
        let raw = alloc(layout);
        let pointer = NonNull::new(raw).expect("percpu area allocation failed");

        unsafe {
            pointer
                .as_ptr()
                .copy_from_nonoverlapping(PERCPU_DATA_START as *const u8, layout.size());
        }

        Self { pointer }
    }

    /// Installs the area via the arch-specific `install` closure (pointing
    /// the percpu base register at it), then registers it under the next
    /// sequential core id. Cores must call this exactly once each, in
    /// bring-up order (BSP first, then each AP as it comes online).
    pub fn setup(self, install: impl FnOnce(NonNull<u8>)) -> usize {
        install(self.pointer);

        let cpuid = NEXT_CPU.fetch_add(1, Ordering::AcqRel);
        assert!(cpuid < MAX_CPUS, "more cores than `MAX_CPUS` ({MAX_CPUS})");
        AREAS[cpuid].store(self.pointer.as_ptr() as usize, Ordering::Release);

        cpuid
    }

    pub fn get_for(cpuid: usize) -> Option<NonNull<()>> {
        let raw = AREAS.get(cpuid)?.load(Ordering::Acquire);
        NonNull::new(raw as *mut ())
    }
}

/// Number of cores that have called [`PercpuArea::setup`] so far. Lets
/// code iterate every booted core's `#[define_percpu_shared]` copy via
/// `get_for_cpu`.
pub fn cpu_count() -> usize {
    NEXT_CPU.load(Ordering::Acquire)
}
