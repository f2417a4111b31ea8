//! A minimal monotonic tick source and clock-event queue: what `spec.md`
//! §4.9 step 4 calls "arm a clock event pointing at a DPC" for `WaitMany`'s
//! timeout, and what §4.8 describes generically as "a timer interrupt
//! queues a reschedule DPC". No concrete arch timer feeds [`tick`] yet --
//! whatever owns the platform timer IRQ (see e.g.
//! `eonix_hal::arch::riscv64::time::set_next_timer`) is expected to call it
//! once per interrupt. That wiring is a firmware/interrupt-controller
//! concern this tree doesn't implement yet, the same class of boundary gap
//! as `crate::dpc`'s queues themselves (nothing drives IPL through
//! `lower()` from a real timer interrupt either): the mechanism is complete
//! and ready to be driven.
use alloc::boxed::Box;
use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Ordering as CmpOrdering;
use core::sync::atomic::{AtomicU64, Ordering};

use eonix_sync::{Spin, SpinIrq as _};

use crate::dpc::queue_dpc;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// The current monotonic tick count, advanced by [`tick`].
pub fn now() -> u64 {
    TICKS.load(Ordering::Acquire)
}

struct ClockEvent {
    deadline: u64,
    id: u64,
    callback: Box<dyn FnOnce() + Send>,
}

impl PartialEq for ClockEvent {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for ClockEvent {}

impl PartialOrd for ClockEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClockEvent {
    // `BinaryHeap` is a max-heap; reverse the deadline comparison so the
    // earliest deadline is always the one on top.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

static QUEUE: Spin<BinaryHeap<ClockEvent>> = Spin::new(BinaryHeap::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a clock event that may still be pending, returned by [`arm`]
/// and consumed by [`cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockEventHandle(u64);

/// Arms `callback` to run, via [`queue_dpc`] at `Dispatch` IPL, once
/// [`now`] reaches `deadline_ticks`. `deadline_ticks` is an absolute tick
/// count (a deadline, not a duration) -- callers that want "N ticks from
/// now" pass `now() + n`.
pub fn arm(deadline_ticks: u64, callback: impl FnOnce() + Send + 'static) -> ClockEventHandle {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    QUEUE.lock_irq().push(ClockEvent {
        deadline: deadline_ticks,
        id,
        callback: Box::new(callback),
    });
    ClockEventHandle(id)
}

/// Cancels a still-pending event. Returns `false` if it already fired (or
/// `handle` doesn't name a live event), matching §4.9 step 7's "a
/// fired-but-not-yet-run event is an edge case": a `false` return means the
/// callback may already be running or queued as a DPC, and the caller must
/// be safe against it still running rather than assume it's inert.
pub fn cancel(handle: ClockEventHandle) -> bool {
    let mut queue = QUEUE.lock_irq();
    let items: Vec<ClockEvent> = core::mem::take(&mut *queue).into_vec();
    let mut found = false;

    let kept: Vec<ClockEvent> = items
        .into_iter()
        .filter(|event| {
            if !found && event.id == handle.0 {
                found = true;
                false
            } else {
                true
            }
        })
        .collect();

    *queue = kept.into();
    found
}

/// Advances the monotonic tick count by one and queues (as a DPC) the
/// callback of every event whose deadline has now passed. Meant to be
/// called once per platform timer interrupt.
pub fn tick() {
    let now = TICKS.fetch_add(1, Ordering::AcqRel) + 1;

    loop {
        let mut queue = QUEUE.lock_irq();
        match queue.peek() {
            Some(event) if event.deadline <= now => {}
            _ => break,
        }
        let event = queue.pop().expect("just peeked an event above");
        drop(queue);

        queue_dpc(event.callback);
    }
}
