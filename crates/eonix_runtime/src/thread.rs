use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use alloc::sync::Arc;
use eonix_hal::context::TaskContext;
use eonix_hal::traits::context::RawTaskContext;
use eonix_sync::{Spin, SpinIrq as _};
use intrusive_collections::{intrusive_adapter, KeyAdapter, LinkedListAtomicLink, RBTreeAtomicLink};

use crate::stack::BoxedStack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u32);

impl Tid {
    pub const IDLE: Tid = Tid(1);

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Classic kernel thread lifecycle. A thread is created in `Setup`, becomes
/// `Ready` once its context has been initialized, `Runnable` once a core has
/// claimed it onto its run queue, `Running` while actually executing, and
/// ends in `Blocked` (parked on a wait) or `Dead` (exited, pending reaper).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RawThreadState {
    Setup = 0,
    Ready = 1,
    Runnable = 2,
    Running = 3,
    Blocked = 4,
    Dead = 5,
}

impl RawThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Setup,
            1 => Self::Ready,
            2 => Self::Runnable,
            3 => Self::Running,
            4 => Self::Blocked,
            5 => Self::Dead,
            _ => unreachable!("invalid thread state {value}"),
        }
    }
}

#[derive(Debug)]
pub struct ThreadState(AtomicU8);

impl ThreadState {
    pub const fn new(state: RawThreadState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> RawThreadState {
        RawThreadState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: RawThreadState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn swap(&self, state: RawThreadState) -> RawThreadState {
        RawThreadState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Atomically transition `from -> to`, returning whether it happened.
    pub fn transition(&self, from: RawThreadState, to: RawThreadState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A schedulable kernel thread.
///
/// Threads never hold user-mode state: this runtime only ever executes
/// kernel code. The wait subsystem and page-fault paths are the only
/// producers of the `Blocked` state; everything else goes through the
/// scheduler's ready queues.
pub struct Thread {
    pub id: Tid,
    /// Core this thread is pinned to, if any (`None` means "pick the least
    /// loaded core when enqueued").
    pub affinity: Option<u32>,
    state: ThreadState,
    context: core::cell::UnsafeCell<TaskContext>,
    stack: BoxedStack,
    link_registry: RBTreeAtomicLink,
    pub(crate) link_ready: LinkedListAtomicLink,
    /// Address of this thread's currently in-flight `wait_many` call's
    /// stage cell, or 0 if it isn't blocked in one. Lets another thread's
    /// `StopWait(thread, why)` (`crate::waitable::stop_wait_thread`) find
    /// and CAS the right cell without `Thread` itself knowing anything
    /// about `waitable`'s types. The lock serializes against
    /// `wait_many`'s own register/unregister pair, which is what makes
    /// dereferencing the address on the other side of this lock sound: it
    /// can only be non-zero while the registering call is still on the
    /// stack, unable to tear its `StageCell` down, because it too needs
    /// this same lock to clear it.
    active_wait: Spin<usize>,
}

// SAFETY: `context` is only ever touched while the owning core holds the
// thread as its current/next thread, under preempt-disabled sections, which
// the scheduler upholds.
unsafe impl Sync for Thread {}

intrusive_adapter!(pub ThreadRegistryAdapter = Arc<Thread>: Thread { link_registry: RBTreeAtomicLink });
intrusive_adapter!(pub ThreadReadyAdapter = Arc<Thread>: Thread { link_ready: LinkedListAtomicLink });

impl<'a> KeyAdapter<'a> for ThreadRegistryAdapter {
    type Key = Tid;

    fn get_key(&self, thread: &'a Thread) -> Self::Key {
        thread.id
    }
}

impl Thread {
    fn alloc_tid() -> Tid {
        // Tid 1 is reserved for each core's idle thread, so real threads
        // start counting from 2.
        static NEXT_TID: AtomicU32 = AtomicU32::new(2);
        Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed))
    }

    /// Builds a new thread that will start executing `entry(arg)` the first
    /// time it's switched to. The thread starts in the `Setup` state; the
    /// caller must move it to `Ready` and hand it to the scheduler.
    pub fn new(
        entry: unsafe extern "C" fn(usize) -> !,
        arg: usize,
        stack: BoxedStack,
        affinity: Option<u32>,
    ) -> Arc<Self> {
        let mut context = TaskContext::new();
        context.set_stack_pointer(stack.get_bottom());
        context.set_interrupt_enabled(true);
        context.call(entry, arg);

        Arc::new(Self {
            id: Self::alloc_tid(),
            affinity,
            state: ThreadState::new(RawThreadState::Setup),
            context: core::cell::UnsafeCell::new(context),
            stack,
            link_registry: RBTreeAtomicLink::new(),
            link_ready: LinkedListAtomicLink::new(),
            active_wait: Spin::new(0),
        })
    }

    /// Builds the dedicated idle thread for a core. Never put on a ready
    /// queue; the scheduler falls back to it when nothing else is runnable.
    pub fn new_idle(
        entry: unsafe extern "C" fn(usize) -> !,
        stack: BoxedStack,
        cpu: u32,
    ) -> Arc<Self> {
        let mut context = TaskContext::new();
        context.set_stack_pointer(stack.get_bottom());
        context.set_interrupt_enabled(true);
        context.call(entry, 0);

        Arc::new(Self {
            id: Tid::IDLE,
            affinity: Some(cpu),
            state: ThreadState::new(RawThreadState::Runnable),
            context: core::cell::UnsafeCell::new(context),
            stack,
            link_registry: RBTreeAtomicLink::new(),
            link_ready: LinkedListAtomicLink::new(),
            active_wait: Spin::new(0),
        })
    }

    pub fn state(&self) -> &ThreadState {
        &self.state
    }

    pub fn is_runnable(&self) -> bool {
        self.state.get() == RawThreadState::Runnable
    }

    /// Registers `addr` (a `*const StageCell` cast to `usize`, or 0 to
    /// clear) as this thread's currently in-flight wait. See
    /// `active_wait`'s doc comment for the soundness argument.
    pub(crate) fn set_active_wait(&self, addr: usize) {
        *self.active_wait.lock_irq() = addr;
    }

    /// Runs `f` with the registered address, under the same lock
    /// `set_active_wait` uses, so a non-zero value read inside `f` is
    /// guaranteed to still be live for the duration of the call.
    pub(crate) fn with_active_wait<R>(&self, f: impl FnOnce(usize) -> R) -> R {
        f(*self.active_wait.lock_irq())
    }

    /// # Safety
    /// Must only be called by the scheduler while performing a context
    /// switch, with preemption disabled and no other reference to either
    /// thread's context outstanding.
    pub unsafe fn context_mut(&self) -> &mut TaskContext {
        unsafe { &mut *self.context.get() }
    }
}
