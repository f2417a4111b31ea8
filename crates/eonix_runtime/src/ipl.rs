//! Interrupt priority levels: a strictly ordered per-CPU value controlling
//! what may preempt the running thread and what deferred work must drain
//! before a lowering takes effect. See `dpc` for the queues drained here.
use core::sync::atomic::Ordering;

use crate::dpc::{drain_apc_queue, drain_dpc_queue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Ipl {
    Passive = 0,
    Apc = 1,
    Dispatch = 2,
    Device = 3,
    High = 4,
}

#[eonix_percpu::define_percpu]
static CURRENT_IPL: u8 = Ipl::Passive as u8;

fn load() -> Ipl {
    match CURRENT_IPL.get() {
        0 => Ipl::Passive,
        1 => Ipl::Apc,
        2 => Ipl::Dispatch,
        3 => Ipl::Device,
        4 => Ipl::High,
        other => unreachable!("invalid IPL value {other}"),
    }
}

fn store(ipl: Ipl) {
    CURRENT_IPL.set(ipl as u8);
}

/// The calling core's current IPL.
pub fn current() -> Ipl {
    load()
}

/// Raises the calling core's IPL. Cheap: a single per-CPU store. Returns
/// the previous level so the caller can restore it with [`lower`].
///
/// # Panics
/// If `to` is not strictly higher than the current level.
pub fn raise(to: Ipl) -> Ipl {
    let prev = load();
    assert!(
        to >= prev,
        "raise({to:?}) called below current IPL {prev:?}"
    );
    store(to);
    prev
}

/// Lowers the calling core's IPL, draining any deferred work queued at the
/// levels being left:
/// - leaving `Dispatch` (or above) for `Apc` or `Passive` drains the DPC
///   queue and then processes the pending-signal queue (§4.9's
///   `SignalWaitable` asynchronous path flushes here).
/// - leaving `Apc` for `Passive` drains the APC queue.
///
/// # Panics
/// If `to` is higher than the current level.
pub fn lower(to: Ipl) {
    let prev = load();
    assert!(to <= prev, "lower({to:?}) called above current IPL {prev:?}");

    if prev > Ipl::Dispatch && to <= Ipl::Dispatch {
        store(Ipl::Dispatch);
        drain_dpc_queue();
        crate::waitable::flush_pending_signals();
    }

    if load() > Ipl::Apc && to <= Ipl::Apc {
        store(Ipl::Apc);
        drain_apc_queue();
    }

    store(to);
}

/// RAII guard that raises IPL on construction and restores the previous
/// level (draining as appropriate) on drop.
#[must_use]
pub struct IplGuard {
    prev: Ipl,
}

impl IplGuard {
    pub fn raise(to: Ipl) -> Self {
        Self { prev: raise(to) }
    }
}

impl Drop for IplGuard {
    fn drop(&mut self) {
        lower(self.prev);
    }
}

/// Whether the calling core may be preempted right now. Only legal at
/// `Passive` or `Apc`.
pub fn preemption_allowed() -> bool {
    load() <= Ipl::Dispatch
}

#[allow(dead_code)]
fn assert_ordered() {
    // Documents the strict ordering §4.8 relies on; not load-bearing at
    // runtime since `Ipl` derives `Ord` directly from declaration order.
    let _ = Ordering::Relaxed;
}
