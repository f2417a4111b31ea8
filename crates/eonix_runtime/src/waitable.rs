//! The wait subsystem: `Waitable` objects (mutexes, timers, conditions),
//! the per-call `WaitEntry` linking a blocked thread into however many
//! waitables it's waiting on at once, and `wait_many`/`signal_waitable`/
//! `reset_waitable`/`stop_wait` built on top of the double-CAS stage
//! machine described for `WaitEntry::stage`.
use core::sync::atomic::{AtomicU8, Ordering};

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use eonix_sync::{Spin, SpinIrq as _};
use intrusive_collections::{intrusive_adapter, LinkedList, LinkedListAtomicLink};

use crate::clock;
use crate::ipl::{self, Ipl};
use crate::scheduler::Scheduler;
use crate::thread::{RawThreadState, Thread};

/// What a [`Waitable`] represents, which determines its wake policy and
/// ticket semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitableKind {
    /// Binary semaphore semantics: one ticket outstanding at a time,
    /// exactly one waiter wakes per signal.
    Mutex,
    /// One-shot: signalling sets the object "due" and wakes every current
    /// waiter; stays due until `reset_waitable` re-arms it.
    Timer,
    /// Pure broadcast: signalling wakes every current waiter and never
    /// banks a signal for waiters that arrive later.
    Condition,
}

/// Outcome of a `wait_many` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// One of the waited-on objects was acquired or signalled.
    Success,
    /// The deadline passed before any object was satisfied.
    Timedout,
    /// `stop_wait`/`CancelWait` cancelled the wait before it completed.
    Cancelled,
    /// `reset_waitable` re-armed the object out from under a waiter.
    Reset,
    /// The call was malformed (reserved for a future driver-ABI entry
    /// point that takes raw, possibly-null entry arrays; unreachable from
    /// this module's own API since entries are always constructed here).
    Incomplete,
}

/// The double-CAS stage shared by every `WaitEntry` belonging to one
/// `wait_many` call. Any waitable's signal path races the wait path on
/// this cell to decide whether the call woke synchronously (it was still
/// `Preparing`/polling) or needs an explicit reschedule (it had already
/// reached `Blocked`). The four terminal stages map 1:1 onto
/// [`WaitStatus`]; `Preparing`/`Blocked` never escape `wait_many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Stage {
    Preparing = 0,
    Blocked = 1,
    Satisfied = 2,
    Cancelled = 3,
    Reset = 4,
    Timedout = 5,
}

struct StageCell(AtomicU8);

impl StageCell {
    fn new() -> Self {
        Self(AtomicU8::new(Stage::Preparing as u8))
    }

    fn get(&self) -> Stage {
        match self.0.load(Ordering::Acquire) {
            0 => Stage::Preparing,
            1 => Stage::Blocked,
            2 => Stage::Satisfied,
            3 => Stage::Cancelled,
            4 => Stage::Reset,
            5 => Stage::Timedout,
            other => unreachable!("invalid wait stage {other}"),
        }
    }

    fn store(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Release);
    }

    fn transition(&self, from: Stage, to: Stage) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One thread's participation in a single `wait_many` call, linked into
/// each waited-on `Waitable`'s waiter list for the duration of the call.
/// Always stack-allocated by the waiting thread and unlinked before the
/// call returns.
pub struct WaitEntry {
    stage: *const StageCell,
    thread: Arc<Thread>,
    link: LinkedListAtomicLink,
}

intrusive_adapter!(WaitEntryAdapter = Arc<WaitEntry> : WaitEntry { link: LinkedListAtomicLink });

// SAFETY: `stage` points at a `StageCell` owned by the stack frame running
// `wait_many`, which does not return until every entry has been unlinked
// from its waitable's list, so the pointee always outlives the entry.
unsafe impl Send for WaitEntry {}
unsafe impl Sync for WaitEntry {}

struct WaitableInner {
    kind: WaitableKind,
    /// `true` once the object has something to give: a free mutex ticket,
    /// a fired timer, or (meaninglessly, for `Condition`) unused.
    armed: bool,
    waiters: LinkedList<WaitEntryAdapter>,
}

impl WaitableInner {
    /// Attempts to consume whatever makes this object satisfied right now,
    /// without blocking. Mutex acquisition is exclusive (consumes the
    /// ticket); Timer is a non-consuming peek since every current waiter
    /// must observe the same firing; Condition never self-satisfies.
    fn try_acquire(&mut self) -> bool {
        match self.kind {
            WaitableKind::Mutex => {
                if self.armed {
                    self.armed = false;
                    true
                } else {
                    false
                }
            }
            WaitableKind::Timer => self.armed,
            WaitableKind::Condition => false,
        }
    }

    /// Arms the object per its kind and returns how many currently queued
    /// waiters should be woken (`None` means "all of them").
    fn signal(&mut self) -> Option<usize> {
        match self.kind {
            WaitableKind::Mutex => {
                self.armed = true;
                Some(1)
            }
            WaitableKind::Timer => {
                self.armed = true;
                None
            }
            WaitableKind::Condition => None,
        }
    }
}

/// A signal delivered to a `Waitable` with no waiters queued (asynchronous
/// `SignalWaitable`, e.g. from interrupt context) is banked here and
/// replayed the next time IPL drops through `Dispatch`, per §4.9.
struct PendingSignal(*const Waitable);

// SAFETY: pointee is a `'static` `Waitable` (every `Waitable` used with
// `signal_waitable` from interrupt context is owned for `'static`, e.g.
// embedded in a device or kernel object); see `flush_pending_signals`.
unsafe impl Send for PendingSignal {}

static PENDING_SIGNALS: Spin<VecDeque<PendingSignal>> = Spin::new(VecDeque::new());

pub struct Waitable {
    inner: Spin<WaitableInner>,
}

impl Waitable {
    pub const fn new(kind: WaitableKind) -> Self {
        Self {
            inner: Spin::new(WaitableInner {
                kind,
                armed: false,
                waiters: LinkedList::new(WaitEntryAdapter::new()),
            }),
        }
    }

    /// Rearms/disarms the object directly (e.g. a timer's periodic
    /// re-arm, or clearing a condition's latch). Returns the previous
    /// armed state.
    pub fn reset(&self, armed: bool) -> bool {
        let mut inner = self.inner.lock_irq();
        core::mem::replace(&mut inner.armed, armed)
    }

    pub fn kind(&self) -> WaitableKind {
        self.inner.lock_irq().kind
    }
}

/// Blocks the current thread until one of `waitables` is satisfied, or
/// `deadline_ticks` ticks (relative to the call, per `crate::clock`; 0
/// means "poll, don't block") elapse. Implements the algorithm verbatim:
/// link every entry
/// and poll for an already-satisfied object, unwind immediately on a poll
/// or an early satisfaction, otherwise raise to `Dispatch`, attempt the
/// Preparing -> Blocked transition, reschedule, and on every wake check
/// the terminal stages before retrying acquisition.
///
/// An empty `waitables` returns `Success` immediately, matching the
/// "nothing to wait for is trivially satisfied" convention the algorithm
/// is specified with.
pub fn wait_many(waitables: &[&Waitable], deadline_ticks: u64) -> WaitStatus {
    if waitables.is_empty() {
        return WaitStatus::Success;
    }

    let stage = StageCell::new();
    let current = Thread::current().clone();

    let entries: alloc::vec::Vec<Arc<WaitEntry>> = waitables
        .iter()
        .map(|_| {
            Arc::new(WaitEntry {
                stage: &stage as *const StageCell,
                thread: current.clone(),
                link: LinkedListAtomicLink::new(),
            })
        })
        .collect();

    let unlink_all = || {
        for (waitable, entry) in waitables.iter().zip(entries.iter()) {
            let mut inner = waitable.inner.lock_irq();
            let mut cursor = inner.waiters.front_mut();
            while let Some(candidate) = cursor.get() {
                if Arc::ptr_eq(candidate, entry) {
                    cursor.remove();
                    break;
                }
                cursor.move_next();
            }
        }
    };

    // Step: link every entry and poll each waitable while linked, so a
    // satisfied one is still cleanly unlinked below rather than leaving
    // its entry dangling in the waiter list.
    let mut satisfied = false;
    for (waitable, entry) in waitables.iter().zip(entries.iter()) {
        let mut inner = waitable.inner.lock_irq();
        inner.waiters.push_back(entry.clone());
        if inner.try_acquire() {
            stage.store(Stage::Satisfied);
            satisfied = true;
        }
    }

    // Step: already satisfied, or this was only a poll -- unwind and
    // report. The CAS either wins (nobody raced us: genuinely timed out)
    // or loses to whatever a racing signal/reset/cancel already installed,
    // which is then read back and mapped 1:1.
    if satisfied || deadline_ticks == 0 {
        unlink_all();
        if stage.transition(Stage::Preparing, Stage::Timedout) {
            return WaitStatus::Timedout;
        }
        return match stage.get() {
            Stage::Satisfied => WaitStatus::Success,
            Stage::Reset => WaitStatus::Reset,
            Stage::Cancelled => WaitStatus::Cancelled,
            other => unreachable!("wait stage {other:?} unreachable after poll CAS loss"),
        };
    }

    // Step: arm a clock event pointing at a DPC that calls
    // `StopWait(thread, Timedout)` on expiry (§4.9 step 4). `deadline_ticks`
    // is relative; the event's absolute deadline is `now() +
    // deadline_ticks`. Registering `current`'s `active_wait` first is what
    // lets that DPC (running on any core, possibly long after this stack
    // frame has moved on to blocking) find and CAS this call's `stage`.
    register_active_wait(&current, &stage);
    let timeout_thread = current.clone();
    let clock_handle = clock::arm(
        clock::now().saturating_add(deadline_ticks),
        move || {
            stop_wait_thread(&timeout_thread, Stage::Timedout);
        },
    );

    loop {
        let guard = ipl::IplGuard::raise(Ipl::Dispatch);

        // Mark the thread `Blocked` before publishing `Stage::Blocked`, so
        // that once a racing `signal_waitable` observes the latter it can
        // always safely hand the thread to `Scheduler::enqueue`.
        current.state().set(RawThreadState::Blocked);

        if !stage.transition(Stage::Preparing, Stage::Blocked) {
            // A signal/reset/cancel beat us here; undo the state change
            // since we're not actually parking.
            current.state().set(RawThreadState::Running);
            drop(guard);
        } else {
            Scheduler::reschedule();
            drop(guard);
        }

        match stage.get() {
            Stage::Satisfied | Stage::Cancelled | Stage::Reset | Stage::Timedout => break,
            Stage::Blocked | Stage::Preparing => {
                // Spurious wake; re-try acquisition directly before
                // re-arming `Preparing` and looping back to block again.
                let mut reacquired = false;
                for waitable in waitables {
                    if waitable.inner.lock_irq().try_acquire() {
                        reacquired = true;
                    }
                }
                if reacquired {
                    stage.store(Stage::Satisfied);
                    break;
                }
                stage.store(Stage::Preparing);
                continue;
            }
        }
    }

    let final_stage = stage.get();

    // Step 7: cancel the clock event before `stage` (stack-allocated) goes
    // out of scope. A `false` return just means it already fired -- its DPC
    // either already ran `stop_wait_thread` (harmless: `final_stage` is
    // already terminal by then, so the CAS inside it just fails) or is
    // still queued and will find `active_wait` cleared below and no-op.
    clock::cancel(clock_handle);
    clear_active_wait(&current);

    unlink_all();

    match final_stage {
        Stage::Satisfied => WaitStatus::Success,
        Stage::Cancelled => WaitStatus::Cancelled,
        Stage::Reset => WaitStatus::Reset,
        Stage::Timedout => WaitStatus::Timedout,
        other => unreachable!("wait stage {other:?} unreachable at wait_many exit"),
    }
}

fn wake_entry(entry: &Arc<WaitEntry>) {
    // SAFETY: see `WaitEntry::stage`'s invariant: the pointee outlives
    // every entry pointing at it.
    let stage = unsafe { &*entry.stage };

    if stage.transition(Stage::Preparing, Stage::Satisfied) {
        // The waiter hadn't reached `Blocked` yet; it'll see `Satisfied`
        // when it polls the stage itself after raising IPL. Nothing to
        // reschedule.
        return;
    }

    if stage.transition(Stage::Blocked, Stage::Satisfied) {
        // Races the waiter's own `current.state().set(Blocked)` ->
        // `reschedule()` sequence in `wait_many`: the stage CAS only
        // succeeds once the waiter has reached `Blocked`, so by the time
        // we get here the state transition has already happened and
        // `enqueue` observes it correctly.
        Scheduler::enqueue(entry.thread.clone());
    }
}

/// Signals `waitable`, waking the appropriate number of current waiters
/// per its kind (§4.9's wake-policy table). Safe to call from any IPL,
/// including interrupt context; if called above `Dispatch` the wake of
/// newly-arrived waiters (none queued yet) is banked and replayed when
/// IPL next drops through `Dispatch`.
pub fn signal_waitable(waitable: &'static Waitable) {
    let mut inner = waitable.inner.lock_irq();
    let wake_count = inner.signal();

    if inner.waiters.is_empty() {
        drop(inner);
        PENDING_SIGNALS
            .lock_irq()
            .push_back(PendingSignal(waitable as *const Waitable));
        return;
    }

    match wake_count {
        Some(n) => {
            for _ in 0..n {
                let Some(entry) = inner.waiters.pop_front() else {
                    break;
                };
                drop(inner);
                wake_entry(&entry);
                inner = waitable.inner.lock_irq();
            }
        }
        None => {
            let mut woken = alloc::vec::Vec::new();
            while let Some(entry) = inner.waiters.pop_front() {
                woken.push(entry);
            }
            drop(inner);
            for entry in &woken {
                wake_entry(entry);
            }
        }
    }
}

/// Drains signals banked by `signal_waitable` calls made above `Dispatch`
/// IPL. Called by [`crate::ipl::lower`] whenever IPL drops to `Dispatch`.
pub(crate) fn flush_pending_signals() {
    loop {
        let Some(pending) = PENDING_SIGNALS.lock_irq().pop_front() else {
            break;
        };
        // SAFETY: every banked `Waitable` is `'static` per `PendingSignal`'s
        // invariant.
        let waitable: &'static Waitable = unsafe { &*pending.0 };
        signal_waitable(waitable);
    }
}

/// Registers `stage` as `thread`'s currently in-flight `wait_many` call, so
/// that `stop_wait_thread` (running on any core, e.g. from a timeout DPC)
/// can find and CAS it. Must be paired with `clear_active_wait` before the
/// registering call's stack-allocated `stage` is torn down.
fn register_active_wait(thread: &Thread, stage: &StageCell) {
    thread.set_active_wait(stage as *const StageCell as usize);
}

fn clear_active_wait(thread: &Thread) {
    thread.set_active_wait(0);
}

/// `StopWait(thread, why)` (§4.9): double-CAS `thread`'s currently
/// in-flight wait stage, `Preparing -> why` else `Blocked -> why`, waking it
/// via the scheduler if it had already blocked. Returns `false` if `thread`
/// has no in-flight `wait_many` call right now, or its stage is already
/// terminal -- "any other current stage means the wait cannot be stopped"
/// per spec. Shared by the timeout clock event (`Timedout`), `cancel_wait`
/// (`Cancelled`), and `stop_waiters`'s broadcast sweep (`Reset`/`Cancelled`).
fn stop_wait_thread(thread: &Arc<Thread>, why: Stage) -> bool {
    thread.with_active_wait(|addr| {
        if addr == 0 {
            return false;
        }

        // SAFETY: a non-zero `addr` was published by `register_active_wait`
        // under this same per-thread lock, and can only be cleared by the
        // registering `wait_many` call itself taking the same lock -- which
        // it cannot do concurrently with this closure holding it. So the
        // `StageCell` this points at, owned by that call's stack frame, is
        // still live for as long as we're inside this closure.
        let stage = unsafe { &*(addr as *const StageCell) };

        if stage.transition(Stage::Preparing, why) {
            return true;
        }
        if stage.transition(Stage::Blocked, why) {
            Scheduler::enqueue(thread.clone());
            return true;
        }
        false
    })
}

/// `CancelWait(thread)` (§4.9): `StopWait(thread, Cancelled)`. Safe from any
/// IPL ≤ Dispatch, from other threads or DPCs. Does nothing (returns
/// `false`) if `thread` isn't currently blocked in a `wait_many` call.
pub fn cancel_wait(thread: &Arc<Thread>) -> bool {
    stop_wait_thread(thread, Stage::Cancelled)
}

/// Pops every currently-queued waiter on `waitable` and stops each one's
/// thread with `why`, via the same per-thread `StopWait` primitive
/// `cancel_wait`/the timeout DPC use. Shared by `stop_wait` (`Cancelled`)
/// and `reset_waitable` (`Reset`).
fn stop_waiters(waitable: &Waitable, why: Stage) {
    let mut inner = waitable.inner.lock_irq();
    let mut woken = alloc::vec::Vec::new();
    while let Some(entry) = inner.waiters.pop_front() {
        woken.push(entry);
    }
    drop(inner);

    for entry in &woken {
        stop_wait_thread(&entry.thread, why);
    }
}

/// Re-arms or disarms `waitable` directly. Per §4.9, every thread
/// currently queued on it is stopped with `WaitStatus::Reset` before the
/// new armed state takes effect, so no waiter is left blocked on a ticket
/// count that just changed under it. Returns the previous armed state.
pub fn reset_waitable(waitable: &Waitable, armed: bool) -> bool {
    stop_waiters(waitable, Stage::Reset);
    waitable.reset(armed)
}

/// Cancels every thread currently blocked in a `wait_many` call that has
/// `waitable` in its wait set, causing those calls to return
/// `WaitStatus::Cancelled`. Used by object teardown paths that must not
/// leave waiters parked on a `Waitable` about to be freed. For cancelling
/// one specific thread's wait rather than every waiter on one object, use
/// [`cancel_wait`].
pub fn stop_wait(waitable: &Waitable) {
    stop_waiters(waitable, Stage::Cancelled);
}
