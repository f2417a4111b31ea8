//! Anonymous memory: a refcounted, sparsely-indexed array of pages
//! (`AnonMap`) with copy-on-write semantics, backing `Anonymous`
//! [`crate::vm::VmRange`]s. Indexed by a 64-wide (6 bits/level) radix
//! tree so a large, mostly-untouched range costs only the tables its
//! touched slots actually need -- tables are created lazily and a map
//! only ever grows, never shrinks, matching the original's append-only
//! resize semantics.
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::UnsafeCell;

use crate::paging::PFN;

const FANOUT_BITS: u32 = 6;
const FANOUT: usize = 1 << FANOUT_BITS;

/// What one logical slot of an [`AnonMap`] currently holds. Exactly one
/// variant applies at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnonPageState {
    /// Never written; reads see zeros, shared by every slot in this state
    /// until a write fault forces a private copy.
    Zero,
    /// Backed by a resident physical frame.
    Resident(PFN),
    /// Pushed out to backing store. The slot id is opaque to `eonix_mm`;
    /// the swap device interprets it. (Placeholder: no swap device is
    /// implemented by this core -- see `spec.md` Non-goals.)
    Swapped(u64),
}

/// One anonymous page. Referenced by every [`AnonMap`] slot that shares
/// it; `Arc::strong_count` on a `AnonPageRef` *is* the page's refcount,
/// matching the invariant that it equals the number of slots referencing
/// it.
pub struct AnonPage {
    state: UnsafeCell<AnonPageState>,
}

// SAFETY: `state` is only ever mutated by the `AnonMap` that currently
// holds the slot referencing this page, which serializes access the same
// way `VmRange`'s interior mutability is serialized by its owning
// `VmSpace`.
unsafe impl Send for AnonPage {}
unsafe impl Sync for AnonPage {}

pub type AnonPageRef = Arc<AnonPage>;

impl AnonPage {
    pub fn zero() -> AnonPageRef {
        Arc::new(Self {
            state: UnsafeCell::new(AnonPageState::Zero),
        })
    }

    pub fn resident(pfn: PFN) -> AnonPageRef {
        Arc::new(Self {
            state: UnsafeCell::new(AnonPageState::Resident(pfn)),
        })
    }

    pub fn state(&self) -> AnonPageState {
        unsafe { *self.state.get() }
    }

    /// # Safety
    /// The caller must ensure no other reference to this page is
    /// concurrently reading or writing its state -- in practice, that the
    /// page is not installed in any `AnonMap` slot reachable by another
    /// thread while this call is in progress.
    pub unsafe fn set_state(&self, state: AnonPageState) {
        unsafe { *self.state.get() = state };
    }
}

enum Entry {
    Empty,
    Leaf(AnonPageRef),
    Table(Box<[Entry; FANOUT]>),
}

fn empty_table() -> Box<[Entry; FANOUT]> {
    Box::new(core::array::from_fn(|_| Entry::Empty))
}

/// Sparse, append-only-resizable array of [`AnonPageRef`]s.
pub struct AnonMap {
    slot_count: usize,
    levels: u32,
    root: Entry,
}

impl AnonMap {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slot_count,
            levels: Self::levels_for(slot_count),
            root: Entry::Empty,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn levels_for(slot_count: usize) -> u32 {
        let mut levels = 1;
        let mut capacity = FANOUT;
        while capacity < slot_count.max(1) {
            capacity *= FANOUT;
            levels += 1;
        }
        levels
    }

    fn index_at(slot: usize, level: u32, levels: u32) -> usize {
        let shift = (levels - 1 - level) * FANOUT_BITS;
        (slot >> shift) & (FANOUT - 1)
    }

    /// Walks to (creating tables as needed) the `Entry` that slot `slot`
    /// resolves to, as a leaf position: either `Empty` or `Leaf`, never
    /// itself a `Table`.
    fn leaf_slot(root: &mut Entry, slot: usize, levels: u32) -> &mut Entry {
        let mut node = root;
        for level in 0..levels - 1 {
            if matches!(node, Entry::Empty) {
                *node = Entry::Table(empty_table());
            }
            let idx = Self::index_at(slot, level, levels);
            node = match node {
                Entry::Table(table) => &mut table[idx],
                _ => unreachable!("radix descent hit a leaf before exhausting levels"),
            };
        }

        if matches!(node, Entry::Empty) {
            *node = Entry::Table(empty_table());
        }
        let idx = Self::index_at(slot, levels - 1, levels);
        match node {
            Entry::Table(table) => &mut table[idx],
            _ => unreachable!("radix descent hit a leaf before exhausting levels"),
        }
    }

    pub fn lookup(&self, slot: usize) -> Option<AnonPageRef> {
        assert!(slot < self.slot_count, "AnonMap slot out of range");

        let mut node = &self.root;
        for level in 0..self.levels - 1 {
            node = match node {
                Entry::Table(table) => &table[Self::index_at(slot, level, self.levels)],
                _ => return None,
            };
        }

        match node {
            Entry::Table(table) => match &table[Self::index_at(slot, self.levels - 1, self.levels)] {
                Entry::Leaf(page) => Some(Arc::clone(page)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Installs `page` at `slot`, returning whatever was there before.
    pub fn insert(&mut self, slot: usize, page: AnonPageRef) -> Option<AnonPageRef> {
        assert!(slot < self.slot_count, "AnonMap slot out of range");
        let levels = self.levels;
        let entry = Self::leaf_slot(&mut self.root, slot, levels);
        match core::mem::replace(entry, Entry::Leaf(page)) {
            Entry::Leaf(old) => Some(old),
            _ => None,
        }
    }

    pub fn remove(&mut self, slot: usize) -> Option<AnonPageRef> {
        assert!(slot < self.slot_count, "AnonMap slot out of range");
        let levels = self.levels;
        let entry = Self::leaf_slot(&mut self.root, slot, levels);
        if matches!(entry, Entry::Leaf(_)) {
            match core::mem::replace(entry, Entry::Empty) {
                Entry::Leaf(page) => Some(page),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    /// Grows the map to cover at least `new_slot_count` slots by wrapping
    /// the existing root one more table level at a time. Never shrinks;
    /// a no-op if `new_slot_count` doesn't exceed the current capacity.
    pub fn grow(&mut self, new_slot_count: usize) {
        if new_slot_count <= self.slot_count {
            return;
        }

        let new_levels = Self::levels_for(new_slot_count);
        while self.levels < new_levels {
            let old_root = core::mem::replace(&mut self.root, Entry::Empty);
            let mut table = empty_table();
            table[0] = old_root;
            self.root = Entry::Table(table);
            self.levels += 1;
        }

        self.slot_count = new_slot_count;
    }

    /// Resolves a write fault against `slot`: if the slot is zero-filled,
    /// swapped out, or resident-but-shared (more than one map slot
    /// referencing it), a private copy is installed; otherwise the
    /// existing resident page is reused in place (caller just upgrades
    /// the PTE to writable). Neither `allocate_zero` nor `copy_from` is
    /// called unless actually needed.
    pub fn fault_write(
        &mut self,
        slot: usize,
        allocate_zero: impl FnOnce() -> AnonPageRef,
        copy_from: impl FnOnce(&AnonPage) -> AnonPageRef,
    ) -> AnonPageRef {
        let existing = self.lookup(slot);

        let new_page = match &existing {
            None => allocate_zero(),
            Some(page) => match page.state() {
                AnonPageState::Zero => allocate_zero(),
                // Baseline is 2: the map's own stored clone, plus the
                // temporary one `lookup` just handed back in `existing`.
                // Anything above that means another slot/map shares it.
                AnonPageState::Resident(_) if Arc::strong_count(page) <= 2 => Arc::clone(page),
                AnonPageState::Resident(_) => copy_from(page),
                AnonPageState::Swapped(_) => copy_from(page),
            },
        };

        self.insert(slot, Arc::clone(&new_page));
        new_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_lookup_starts_empty() {
        let map = AnonMap::new(4096);
        assert!(map.lookup(0).is_none());
        assert!(map.lookup(4095).is_none());
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut map = AnonMap::new(128);
        let page = AnonPage::resident(PFN::from_val(7));
        map.insert(5, page);
        match map.lookup(5).unwrap().state() {
            AnonPageState::Resident(pfn) => assert_eq!(usize::from(pfn), 7),
            _ => panic!("expected resident page"),
        }
        assert!(map.lookup(6).is_none());
    }

    #[test]
    fn grow_preserves_existing_slots() {
        let mut map = AnonMap::new(64);
        map.insert(3, AnonPage::resident(PFN::from_val(1)));
        map.grow(1 << 16);
        assert_eq!(map.slot_count(), 1 << 16);
        assert!(map.lookup(3).is_some());
        assert!(map.lookup(1000).is_none());
    }

    #[test]
    fn cow_promotes_sole_owner_in_place() {
        let mut map = AnonMap::new(16);
        let page = AnonPage::resident(PFN::from_val(2));
        map.insert(0, page);

        let mut allocated = false;
        let resolved = map.fault_write(0, || { allocated = true; AnonPage::zero() }, |_| panic!("unexpected copy"));
        assert!(!allocated);
        match resolved.state() {
            AnonPageState::Resident(pfn) => assert_eq!(usize::from(pfn), 2),
            _ => panic!("expected resident page"),
        }
    }

    #[test]
    fn cow_copies_shared_resident_page() {
        let mut map_a = AnonMap::new(16);
        let page = AnonPage::resident(PFN::from_val(2));
        map_a.insert(0, Arc::clone(&page));
        let mut map_b = AnonMap::new(16);
        map_b.insert(0, Arc::clone(&page));

        let mut copied = false;
        let resolved = map_a.fault_write(
            0,
            || panic!("unexpected zero alloc"),
            |_| { copied = true; AnonPage::resident(PFN::from_val(3)) },
        );
        assert!(copied);
        match resolved.state() {
            AnonPageState::Resident(pfn) => assert_eq!(usize::from(pfn), 3),
            _ => panic!("expected resident page"),
        }
    }
}
