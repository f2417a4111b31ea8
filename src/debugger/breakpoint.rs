//! Breakpoint registry (`spec.md` §4.11): a flat address -> `HwBreakpoint`
//! map. The arch layer may bind up to `MAX_HW_SLOTS` of them to real
//! hardware debug registers; anything past that falls back to a software
//! breakpoint (an arch-specific trap instruction patched into the
//! target address -- the actual patching is an arch-layer concern this
//! tree doesn't implement yet, so `Software` entries are tracked here but
//! never installed).
use alloc::collections::btree_map::BTreeMap;

use eonix_sync::Spin;

/// However many hardware debug-register slots the arch layer exposes.
/// x86_64's `DR0`-`DR3` is the tightest case among this workspace's three
/// target arches; used as the registry's own capacity so a full house of
/// hardware breakpoints never needs a software fallback on any of them.
pub const MAX_HW_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    /// Bound to hardware debug register `slot`.
    Hardware { slot: u8 },
    /// No hardware slot free; would need an in-memory trap patch to take
    /// effect, which this tree doesn't implement.
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwBreakpoint {
    pub address: usize,
    pub kind: BreakpointKind,
}

/// Binds/unbinds a hardware debug register. Implemented by the arch
/// layer; the registry calls this to keep its own bookkeeping in sync
/// with the real hardware state.
pub trait HwBreakpointOps: Send + Sync {
    fn bind(&self, slot: u8, address: usize) -> bool;
    fn unbind(&self, slot: u8);
}

struct Registry {
    breakpoints: BTreeMap<usize, HwBreakpoint>,
    used_slots: [bool; MAX_HW_SLOTS],
}

impl Registry {
    const fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            used_slots: [false; MAX_HW_SLOTS],
        }
    }

    fn free_slot(&self) -> Option<u8> {
        self.used_slots
            .iter()
            .position(|used| !used)
            .map(|slot| slot as u8)
    }
}

static REGISTRY: Spin<Registry> = Spin::new(Registry::new());

/// Inserts a breakpoint at `address`, binding it to a free hardware slot
/// via `ops` when one is available, otherwise recording it as a software
/// breakpoint. Returns the kind actually assigned.
pub fn set_breakpoint(address: usize, ops: &dyn HwBreakpointOps) -> BreakpointKind {
    let mut registry = REGISTRY.lock();

    let kind = match registry.free_slot() {
        Some(slot) if ops.bind(slot, address) => {
            registry.used_slots[slot as usize] = true;
            BreakpointKind::Hardware { slot }
        }
        _ => BreakpointKind::Software,
    };

    registry.breakpoints.insert(address, HwBreakpoint { address, kind });
    kind
}

/// Removes the breakpoint at `address`, freeing its hardware slot (if
/// any) via `ops`. No-op if nothing is set there.
pub fn clear_breakpoint(address: usize, ops: &dyn HwBreakpointOps) {
    let mut registry = REGISTRY.lock();

    if let Some(bp) = registry.breakpoints.remove(&address) {
        if let BreakpointKind::Hardware { slot } = bp.kind {
            ops.unbind(slot);
            registry.used_slots[slot as usize] = false;
        }
    }
}

pub fn breakpoint_at(address: usize) -> Option<HwBreakpoint> {
    REGISTRY.lock().breakpoints.get(&address).copied()
}

pub fn clear_all(ops: &dyn HwBreakpointOps) {
    let mut registry = REGISTRY.lock();
    for slot in 0..MAX_HW_SLOTS as u8 {
        if registry.used_slots[slot as usize] {
            ops.unbind(slot);
        }
    }
    registry.used_slots = [false; MAX_HW_SLOTS];
    registry.breakpoints.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct CountingOps {
        binds: AtomicUsize,
        unbinds: AtomicUsize,
        refuse: bool,
    }

    impl HwBreakpointOps for CountingOps {
        fn bind(&self, _slot: u8, _address: usize) -> bool {
            self.binds.fetch_add(1, Ordering::Relaxed);
            !self.refuse
        }
        fn unbind(&self, _slot: u8) {
            self.unbinds.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn fills_hardware_slots_before_falling_back_to_software() {
        let ops = CountingOps {
            binds: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
            refuse: false,
        };

        for i in 0..MAX_HW_SLOTS {
            let kind = set_breakpoint(0x1000 + i, &ops);
            assert_eq!(kind, BreakpointKind::Hardware { slot: i as u8 });
        }

        let overflow = set_breakpoint(0x2000, &ops);
        assert_eq!(overflow, BreakpointKind::Software);

        clear_all(&ops);
        assert_eq!(ops.unbinds.load(Ordering::Relaxed), MAX_HW_SLOTS);
        assert!(breakpoint_at(0x1000).is_none());
    }

    #[test]
    fn refused_bind_falls_back_to_software() {
        let ops = CountingOps {
            binds: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
            refuse: true,
        };

        let kind = set_breakpoint(0x3000, &ops);
        assert_eq!(kind, BreakpointKind::Software);
        clear_breakpoint(0x3000, &ops);
        assert_eq!(ops.unbinds.load(Ordering::Relaxed), 0);
    }
}
