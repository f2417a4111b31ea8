//! Fatal-error handling: `spec.md` §7's Fatal category ("panic: freeze all
//! cores, print header + trap frame + backtrace + core/thread info, halt").
//!
//! Grounded on `original_source/kernel/Panic.cpp`'s `BeginPanic`/`EndPanic`
//! pair (the `panicFlag` double-CAS recursion guard, the
//! `DisableInterrupts` -> freeze-cores -> `LogSink::begin_panic` ->
//! header -> body -> halt sequence) and the teacher's own
//! `src/panic.rs::stack_trace` (the `unwinding`-crate backtrace walk),
//! ported onto this workspace's `eonix_log::begin_panic`/`LogSink` in
//! place of the original's `Core::AcquirePanicOutputs`.
use core::ffi::c_void;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use eonix_hal::processor::{halt, CPU, CPU_COUNT};
use eonix_log::{begin_panic, println_fatal};
use eonix_runtime::thread::Thread;
use unwinding::abi::{
    UnwindContext, UnwindReasonCode, _Unwind_Backtrace, _Unwind_GetIP, _Unwind_GetRegionStart,
};

/// `spec.md`'s `panicFlag` double-CAS guard, per `original_source`'s
/// `Panic.cpp::BeginPanic`: the first panicker runs the full sequence, any
/// later panicker on any core (including a fault inside this handler
/// itself) just halts immediately rather than risk recursing through a
/// half-printed panic.
static PANIC_FLAG: AtomicUsize = AtomicUsize::new(0);

/// Set once early bring-up has a real current-CPU/current-thread to read.
/// Mirrors `Panic.cpp`'s `CoreLocalAvailable()` guard around
/// `PrintCoreInfo` -- a panic before that point skips the core/thread
/// line instead of faulting while trying to print it.
static CORE_LOCAL_READY: AtomicBool = AtomicBool::new(false);

/// Called once early bring-up has installed this core's percpu area and
/// idle thread. Before this, [`panic`] skips the core/thread info line.
pub fn mark_core_local_ready() {
    CORE_LOCAL_READY.store(true, Ordering::Release);
}

fn print_backtrace() {
    struct CallbackData {
        counter: usize,
    }

    extern "C" fn callback(unwind_ctx: &UnwindContext<'_>, arg: *mut c_void) -> UnwindReasonCode {
        let data = unsafe { &mut *(arg as *mut CallbackData) };
        data.counter += 1;

        let ip = _Unwind_GetIP(unwind_ctx);
        match crate::symbol_store::find_symbol_by_addr(ip) {
            Some((repo, sym)) => println_fatal!(
                "{:4}: {:#018x} - {}!{}+{:#x}",
                data.counter,
                ip,
                repo.name,
                sym.name,
                ip - sym.base,
            ),
            None => println_fatal!(
                "{:4}: {:#018x} - <unknown> at function {:#018x}",
                data.counter,
                ip,
                _Unwind_GetRegionStart(unwind_ctx),
            ),
        }

        UnwindReasonCode::NO_REASON
    }

    println_fatal!("<<<<<<<<<< 8< CUT HERE 8< <<<<<<<<<<");

    let mut data = CallbackData { counter: 0 };
    _Unwind_Backtrace(callback, &raw mut data as *mut c_void);
}

fn print_core_and_thread_info() {
    if !CORE_LOCAL_READY.load(Ordering::Acquire) {
        println_fatal!("core-local info not available yet");
        return;
    }

    let cpuid = CPU::local().cpuid();
    let tid = Thread::current().id.get();
    println_fatal!("core {cpuid}: thread={tid}");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let _ = eonix_hal::trap::disable_irqs_save();

    if PANIC_FLAG.fetch_add(1, Ordering::SeqCst) != 0 {
        loop {
            halt();
        }
    }

    // Stop every other core before printing a word, using the debugger's
    // freeze protocol (`spec.md` §4.11) independent of whether a debug
    // session is attached -- see `crate::debugger::freeze_other_cores`'s
    // doc comment. Never thawed: nothing about this path returns.
    crate::debugger::freeze_other_cores(CPU_COUNT.load(Ordering::Relaxed));

    begin_panic();

    println_fatal!("kernel panic: {info}");
    print_core_and_thread_info();
    print_backtrace();
    println_fatal!("System has halted indefinitely, manual reset required.");

    loop {
        halt();
    }
}
