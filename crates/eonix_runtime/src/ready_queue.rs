use alloc::sync::Arc;
use eonix_sync::{LazyLock, Spin};
use intrusive_collections::LinkedList;

use crate::thread::{Thread, ThreadReadyAdapter};

#[eonix_percpu::define_percpu_shared]
static READY_QUEUE: ReadyQueueCell = ReadyQueueCell::new();

pub struct ReadyQueueCell(LazyLock<Spin<LinkedList<ThreadReadyAdapter>>>);

impl ReadyQueueCell {
    const fn new() -> Self {
        Self(LazyLock::new(|| Spin::new(LinkedList::new(ThreadReadyAdapter::new()))))
    }

    pub fn len(&self) -> usize {
        self.0.lock().iter().count()
    }

    pub fn push_back(&self, thread: Arc<Thread>) {
        self.0.lock().push_back(thread);
    }

    pub fn pop_front(&self) -> Option<Arc<Thread>> {
        self.0.lock().pop_front()
    }
}

/// This core's ready queue (threads in the `Runnable` state assigned here).
pub fn local_rq() -> &'static ReadyQueueCell {
    &READY_QUEUE
}

/// The length of every core's ready queue, used by [`crate::scheduler::Scheduler::enqueue`]
/// to pick the least-loaded core when a thread has no affinity set.
pub fn rq_len_for(cpuid: usize) -> Option<usize> {
    READY_QUEUE.get_for_cpu(cpuid).map(|cell| cell.len())
}
