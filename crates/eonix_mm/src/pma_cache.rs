//! Bounded pool of virtual "accessor" slots, each mapping exactly one
//! physical frame on demand, used to read or write arbitrary physical
//! memory without reserving a permanent kernel VA for it. Built directly
//! on [`Hat::map_add`]/[`Hat::map_clear`] -- the same primitives
//! [`crate::hat::TempMap`] uses for a single ad-hoc mapping -- plus
//! LRU-ish reclamation across a fixed slot count.
//!
//! `eonix_mm` sits below `eonix_sync` in the dependency graph (`eonix_hal`,
//! which `eonix_sync` needs, depends on `eonix_mm`), so slot selection is
//! serialized with a small ticket-free spinlock built from a single
//! `AtomicBool`, not `eonix_sync::Spin`.
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::address::VAddr;
use crate::hat::{Hat, HatFlags};
use crate::paging::{PFN, PAGE_SIZE};

struct RawSpinLock(AtomicBool);

impl RawSpinLock {
    const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn lock(&self) {
        while self
            .0
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.0.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    unsafe fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Slot {
    pfn: Option<PFN>,
    refcount: usize,
    clock: usize,
}

/// # Panics
/// [`acquire`](Self::acquire) panics if every slot is pinned (nonzero
/// refcount) when a new frame needs a slot -- this is a caller bug (too
/// many nested accessors live at once), not a resource-shortage error a
/// caller is expected to recover from.
pub struct PmaCache<'a, H: Hat, const SLOTS: usize> {
    hat: &'a H,
    base: VAddr,
    lock: RawSpinLock,
    clock: AtomicUsize,
    slots: [core::cell::UnsafeCell<Slot>; SLOTS],
}

unsafe impl<'a, H: Hat + Sync, const SLOTS: usize> Sync for PmaCache<'a, H, SLOTS> {}

impl<'a, H: Hat, const SLOTS: usize> PmaCache<'a, H, SLOTS> {
    /// `base` is the first of `SLOTS` contiguous, page-sized virtual
    /// addresses reserved by the arch layer for this cache.
    pub fn new(hat: &'a H, base: VAddr) -> Self {
        Self {
            hat,
            base,
            lock: RawSpinLock::new(),
            clock: AtomicUsize::new(0),
            slots: core::array::from_fn(|_| {
                core::cell::UnsafeCell::new(Slot {
                    pfn: None,
                    refcount: 0,
                    clock: 0,
                })
            }),
        }
    }

    fn slot_addr(&self, index: usize) -> VAddr {
        self.base + index * PAGE_SIZE
    }

    /// Maps `pfn` into a slot (reusing one already mapped to `pfn` if any)
    /// and returns a guard giving access to it. The guard's `Drop` is what
    /// makes the slot reclaimable again.
    pub fn acquire(&self, pfn: PFN) -> PmaGuard<'_, 'a, H, SLOTS> {
        self.lock.lock();

        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut reused = None;
        let mut victim = None;

        for i in 0..SLOTS {
            let slot = unsafe { &mut *self.slots[i].get() };
            if slot.pfn == Some(pfn) {
                reused = Some(i);
                break;
            }
            if slot.refcount == 0 {
                match victim {
                    None => victim = Some(i),
                    Some(v) => {
                        let v_clock = unsafe { (*self.slots[v].get()).clock };
                        if slot.clock < v_clock {
                            victim = Some(i);
                        }
                    }
                }
            }
        }

        let index = match reused {
            Some(i) => i,
            None => {
                let i = victim.expect("PmaCache exhausted: every slot is pinned");
                let slot = unsafe { &mut *self.slots[i].get() };
                if slot.pfn.is_some() {
                    let _ = self.hat.map_clear(self.slot_addr(i));
                }
                self.hat
                    .map_add(
                        self.slot_addr(i),
                        pfn,
                        HatFlags {
                            write: true,
                            ..HatFlags::new()
                        },
                    )
                    .expect("PmaCache slot address must always be mappable");
                slot.pfn = Some(pfn);
                i
            }
        };

        let slot = unsafe { &mut *self.slots[index].get() };
        slot.refcount += 1;
        slot.clock = tick;

        unsafe { self.lock.unlock() };

        PmaGuard {
            cache: self,
            index,
        }
    }

    fn release(&self, index: usize) {
        self.lock.lock();
        let slot = unsafe { &mut *self.slots[index].get() };
        debug_assert!(slot.refcount > 0);
        slot.refcount -= 1;
        unsafe { self.lock.unlock() };
    }
}

/// Live accessor into one [`PmaCache`] slot. Dropping it marks the slot
/// reclaimable; it is not unmapped immediately, so a subsequent `acquire`
/// of the same frame can reuse the mapping for free.
pub struct PmaGuard<'c, 'a, H: Hat, const SLOTS: usize> {
    cache: &'c PmaCache<'a, H, SLOTS>,
    index: usize,
}

impl<'c, 'a, H: Hat, const SLOTS: usize> PmaGuard<'c, 'a, H, SLOTS> {
    pub fn addr(&self) -> VAddr {
        self.cache.slot_addr(self.index)
    }
}

impl<'c, 'a, H: Hat, const SLOTS: usize> Drop for PmaGuard<'c, 'a, H, SLOTS> {
    fn drop(&mut self) {
        self.cache.release(self.index);
    }
}
