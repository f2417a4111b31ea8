use core::ptr::NonNull;

use alloc::sync::Arc;
use eonix_hal::context::TaskContext;
use eonix_hal::processor::CPU;
use eonix_hal::traits::context::RawTaskContext;
use eonix_log::println_trace;
use eonix_sync::{LazyLock, Spin, SpinIrq as _};
use intrusive_collections::RBTree;
use pointers::BorrowedArc;

use crate::ready_queue::{local_rq, rq_len_for};
use crate::stack::BoxedStack;
use crate::thread::{RawThreadState, Thread, ThreadRegistryAdapter, Tid};

/// The thread currently running on this core. Owns one strong reference:
/// exactly one of "in `CURRENT_THREAD`" or "on a ready queue" or "dropped"
/// holds the `Arc` for any given thread at any time.
#[eonix_percpu::define_percpu]
static CURRENT_THREAD: Option<NonNull<Thread>> = None;

/// This core's idle thread, kept alive for the lifetime of the kernel.
/// Unlike `CURRENT_THREAD` this slot is never emptied; `reschedule()` only
/// ever borrows a fresh clone out of it.
#[eonix_percpu::define_percpu]
static IDLE_THREAD: Option<NonNull<Thread>> = None;

/// A thread that died on this core and is still referenced by its (now
/// stale) `TaskContext`, held here for exactly one more `reschedule()` so
/// the switch that saves its final register state has somewhere valid to
/// write before it's reaped. The original scheduler uses a dedicated
/// reaper thread for this; one extra cycle of deferral is enough here
/// since nothing ever switches back into a `Dead` thread.
#[eonix_percpu::define_percpu]
static ZOMBIE: Option<NonNull<Thread>> = None;

static THREADS: LazyLock<Spin<RBTree<ThreadRegistryAdapter>>> =
    LazyLock::new(|| Spin::new(RBTree::new(ThreadRegistryAdapter::new())));

impl Thread {
    pub fn current<'a>() -> BorrowedArc<'a, Thread> {
        unsafe {
            // SAFETY: `CURRENT_THREAD` only ever changes from inside
            // `Scheduler::reschedule()`, which never runs concurrently with
            // the thread it's replacing.
            BorrowedArc::from_raw(CURRENT_THREAD.get().expect("no current thread on this core"))
        }
    }
}

/// The classic thread-based scheduler: one ready queue per core, a global
/// registry of every live thread keyed by [`Tid`], and a dedicated idle
/// thread per core that `reschedule()` falls back to when nothing else is
/// runnable.
pub struct Scheduler;

impl Scheduler {
    /// Brings up the calling core's scheduling state: creates its idle
    /// thread and makes it the current thread. Must run once per core,
    /// before any call to `reschedule()` on that core.
    pub fn register_core(idle_stack: BoxedStack, idle_entry: unsafe extern "C" fn(usize) -> !) {
        let cpuid = CPU::local().cpuid();
        let idle = Thread::new_idle(idle_entry, idle_stack, cpuid as u32);

        unsafe {
            let permanent = Arc::into_raw(idle.clone()) as *mut Thread;
            IDLE_THREAD.set(Some(NonNull::new_unchecked(permanent)));

            let running = Arc::into_raw(idle) as *mut Thread;
            CURRENT_THREAD.set(Some(NonNull::new_unchecked(running)));
        }
    }

    /// Creates a new thread in the `Setup` state and registers it globally.
    /// The caller must call [`Scheduler::enqueue`] once the thread is ready
    /// to run.
    pub fn create_thread(
        entry: unsafe extern "C" fn(usize) -> !,
        arg: usize,
        stack: BoxedStack,
        affinity: Option<u32>,
    ) -> Arc<Thread> {
        let thread = Thread::new(entry, arg, stack, affinity);
        THREADS.lock_irq().insert(thread.clone());
        thread
    }

    /// Moves a thread from `Setup`/`Blocked` to `Ready`, then `Runnable` on
    /// a core's ready queue — either its pinned affinity, or whichever core
    /// currently has the shortest queue.
    pub fn enqueue(thread: Arc<Thread>) {
        let state = thread.state();
        assert!(
            matches!(
                state.get(),
                RawThreadState::Setup | RawThreadState::Blocked
            ),
            "enqueue() called on a thread in state {:?}",
            state.get(),
        );
        state.set(RawThreadState::Ready);

        let target_cpu = match thread.affinity {
            Some(cpu) => cpu as usize,
            None => Self::least_loaded_cpu(),
        };

        state.set(RawThreadState::Runnable);

        // `least_loaded_cpu()` picks the target core, but cross-core
        // enqueueing still lands the thread on the *local* ready queue:
        // pushing onto a remote core's queue without also sending it a
        // wakeup IPI would leave the thread sitting there until that core
        // happens to reschedule on its own. Until the interrupt controller
        // driver can send that IPI, every thread actually runs wherever it
        // was enqueued from; `target_cpu` is computed for when that lands.
        let _ = target_cpu;
        local_rq().push_back(thread);
    }

    fn least_loaded_cpu() -> usize {
        let mut best = CPU::local().cpuid();
        let mut best_len = usize::MAX;

        for cpuid in
            0..eonix_hal::processor::CPU_COUNT.load(core::sync::atomic::Ordering::Relaxed)
        {
            if let Some(len) = rq_len_for(cpuid) {
                if len < best_len {
                    best_len = len;
                    best = cpuid;
                }
            }
        }

        best
    }

    /// Marks the current thread `Dead` and reschedules away from it. Never
    /// returns; the thread's resources are reclaimed from the next
    /// `reschedule()` that finds it current in the `Dead` state.
    pub fn destroy_current(exit_code: i32) -> ! {
        let current = Thread::current();
        println_trace!(
            "trace_scheduler",
            "thread {:?} exiting with code {exit_code}",
            current.id,
        );
        current.state().set(RawThreadState::Dead);
        drop(current);

        Self::reschedule();
        unreachable!("a dead thread was rescheduled back in");
    }

    fn remove_dead(tid: Tid) {
        let mut threads = THREADS.lock_irq();
        let mut cursor = threads.find_mut(&tid);
        cursor.remove();
    }

    /// Frees whatever thread died on this core during the *previous*
    /// `reschedule()`, now that we're certain nothing still holds a
    /// reference to its `TaskContext`.
    fn reap_zombie() {
        let Some(ptr) = ZOMBIE.swap(None) else {
            return;
        };

        // SAFETY: stashed as an owning reference by the `Dead` arm below.
        let zombie = unsafe { Arc::from_raw(ptr.as_ptr()) };
        let tid = zombie.id;
        drop(zombie);
        Self::remove_dead(tid);
    }

    /// Picks the next runnable thread for this core (round-robin: whatever
    /// is at the front of the local ready queue, falling back to idle),
    /// re-enqueues the outgoing thread if it's still runnable, and performs
    /// the context switch.
    ///
    /// Must be called with interrupts disabled and at a run level where
    /// preemption is legal; callers outside the `sched` run-level machinery
    /// should go through that instead of calling this directly.
    pub fn reschedule() {
        Self::reap_zombie();

        let rq = local_rq();

        // Reclaim the one owning reference to the outgoing thread.
        let current: Arc<Thread> = unsafe {
            let ptr = CURRENT_THREAD
                .swap(None)
                .expect("no current thread to switch away from");
            Arc::from_raw(ptr.as_ptr())
        };

        let prev_context = current.as_ref() as *const Thread;

        match current.state().get() {
            RawThreadState::Running => {
                current.state().set(RawThreadState::Runnable);
                rq.push_back(current);
            }
            RawThreadState::Dead => unsafe {
                // Deferred to `reap_zombie()` on this core's next
                // `reschedule()` call — see `ZOMBIE`'s doc comment.
                ZOMBIE.set(Some(NonNull::new_unchecked(
                    Arc::into_raw(current) as *mut Thread
                )));
            },
            RawThreadState::Blocked => {
                // Parked on a wait; the wait subsystem owns re-enqueueing
                // and therefore owns this strong reference from here on.
                drop(current);
            }
            other => unreachable!("reschedule() found current thread in state {other:?}"),
        }

        let next = rq.pop_front().unwrap_or_else(|| unsafe {
            let idle = IDLE_THREAD
                .get()
                .expect("idle thread not registered for this core");
            BorrowedArc::from_raw(idle).clone()
        });

        let prev_state = next.state().swap(RawThreadState::Running);
        assert!(
            matches!(prev_state, RawThreadState::Runnable),
            "thread {:?} picked for scheduling was in state {prev_state:?}",
            next.id,
        );

        println_trace!(
            "trace_scheduler",
            "CPU{} switching to thread {:?}",
            CPU::local().cpuid(),
            next.id,
        );

        let next_context = next.as_ref() as *const Thread;

        unsafe {
            CURRENT_THREAD.set(Some(NonNull::new_unchecked(
                Arc::into_raw(next) as *mut Thread
            )));
        }

        // SAFETY: `prev_context` is kept alive by whatever now owns the
        // outgoing thread's `Arc` (the ready queue, the wait subsystem, or
        // nobody if it's `Dead` and about to be reaped — in which case we
        // never switch back into it). `next_context` is kept alive by the
        // strong reference just stashed in `CURRENT_THREAD`.
        unsafe {
            TaskContext::switch(
                (*prev_context).context_mut(),
                (*next_context).context_mut(),
            );
        }
    }

    /// Switches away from the bootstrap context into the scheduler proper.
    /// Never returns.
    pub fn enter() -> ! {
        loop {
            Self::reschedule();
        }
    }
}
