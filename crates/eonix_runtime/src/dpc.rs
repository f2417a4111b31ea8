//! Deferred procedure calls (run at `Dispatch` IPL, queued from interrupt
//! context) and asynchronous procedure calls (run at `Apc` IPL, queued
//! against a particular thread). Both queues are per-CPU; APCs drain only
//! when their target thread happens to be the one running on this core at
//! the moment `Apc` is left, matching how a uniprocessor-style APC delivery
//! works — a thread parked on another core picks its APCs up next time it's
//! scheduled there and IPL drops below `Apc`.
use alloc::boxed::Box;
use alloc::sync::Arc;

use eonix_sync::{Spin, SpinIrq as _};
use intrusive_collections::{intrusive_adapter, LinkedList, LinkedListAtomicLink};

use crate::thread::Thread;

pub struct Dpc {
    link: LinkedListAtomicLink,
    func: Box<dyn FnOnce() + Send>,
}

intrusive_adapter!(DpcAdapter = Box<Dpc>: Dpc { link: LinkedListAtomicLink });

pub struct Apc {
    link: LinkedListAtomicLink,
    target: Arc<Thread>,
    func: Box<dyn FnOnce(&Arc<Thread>) + Send>,
}

intrusive_adapter!(ApcAdapter = Box<Apc>: Apc { link: LinkedListAtomicLink });

#[eonix_percpu::define_percpu_shared]
static DPC_QUEUE: DpcQueueCell = DpcQueueCell::new();

#[eonix_percpu::define_percpu_shared]
static APC_QUEUE: ApcQueueCell = ApcQueueCell::new();

struct DpcQueueCell(Spin<LinkedList<DpcAdapter>>);

impl DpcQueueCell {
    const fn new() -> Self {
        Self(Spin::new(LinkedList::new(DpcAdapter::new())))
    }
}

struct ApcQueueCell(Spin<LinkedList<ApcAdapter>>);

impl ApcQueueCell {
    const fn new() -> Self {
        Self(Spin::new(LinkedList::new(ApcAdapter::new())))
    }
}

/// Queues `func` to run on this core at the next opportunity IPL drops to
/// `Dispatch` or below. Safe to call from interrupt context.
pub fn queue_dpc(func: impl FnOnce() + Send + 'static) {
    let dpc = Box::new(Dpc {
        link: LinkedListAtomicLink::new(),
        func: Box::new(func),
    });
    DPC_QUEUE.0.lock_irq().push_back(dpc);
}

/// Queues `func` to run against `target` the next time IPL drops below
/// `Apc` while `target` happens to be current on whatever core drains it.
pub fn queue_apc(target: Arc<Thread>, func: impl FnOnce(&Arc<Thread>) + Send + 'static) {
    let apc = Box::new(Apc {
        link: LinkedListAtomicLink::new(),
        target,
        func: Box::new(func),
    });
    APC_QUEUE.0.lock_irq().push_back(apc);
}

/// Runs every DPC queued on this core. Called by [`crate::ipl::lower`] when
/// IPL drops at or below `Dispatch`.
pub(crate) fn drain_dpc_queue() {
    loop {
        let Some(dpc) = DPC_QUEUE.0.lock_irq().pop_front() else {
            break;
        };
        (dpc.func)();
    }
}

/// Runs every APC queued on this core whose target is the thread currently
/// running here. APCs for other threads are left queued. Called by
/// [`crate::ipl::lower`] when IPL drops to `Passive`.
pub(crate) fn drain_apc_queue() {
    let current = Thread::current();

    loop {
        let mut queue = APC_QUEUE.0.lock_irq();
        let mut cursor = queue.front_mut();
        let mut found = None;
        while let Some(apc) = cursor.get() {
            if Arc::ptr_eq(&apc.target, &*current) {
                found = cursor.remove();
                break;
            }
            cursor.move_next();
        }
        drop(queue);

        match found {
            Some(apc) => (apc.func)(&apc.target),
            None => break,
        }
    }
}
