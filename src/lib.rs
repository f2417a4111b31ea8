#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use eonix_hal::bootstrap::{shutdown, BootStrapData};
use eonix_hal::processor::{halt, CPU, CPU_COUNT};
use eonix_log::println_debug;
use eonix_mm::address::PRange;
use eonix_runtime::scheduler::Scheduler;
use eonix_runtime::stack::BoxedStack;
use eonix_runtime::thread::{RawThreadState, Thread};

mod config;
mod debugger;
mod drivers;
mod heap;
mod kernel_init;
mod kernel_stack;
mod kresult;
mod panic;
mod prelude;
mod symbol_store;

use kernel_init::setup_memory;
use kernel_stack::KernelStack;

/// Set once the BSP has finished early bring-up; the APs spin on this
/// before touching anything the BSP set up (the page allocator, the PFN-DB,
/// ...).
static BSP_OK: AtomicBool = AtomicBool::new(false);
static CPU_SHUTTING_DOWN: AtomicUsize = AtomicUsize::new(0);

/// Every core's idle-thread entry point. Never genuinely runs this body:
/// the first `reschedule()` this core ever performs clobbers the idle
/// thread's saved context with the boot path's own registers (the boot
/// path *is* "idle" from that point on), so this only matters as the
/// context a fresh `register_core` produces before that first switch.
unsafe extern "C" fn idle_loop(_: usize) -> ! {
    Scheduler::enter()
}

/// Entry point of the one work thread each core starts with. The driver
/// model (`spec.md` §4.10, `drivers/`) has nothing to load yet -- no
/// concrete boot-supplied module blob source is wired up here, since
/// producing one is a firmware/bootloader concern this tree doesn't
/// implement -- so for now this is genuinely all there is to do once the
/// core is up.
unsafe extern "C" fn standard_main_entry(_: usize) -> ! {
    shutdown_system();
}

fn shutdown_system() -> ! {
    let cpu_count = CPU_COUNT.load(Ordering::Relaxed);

    if CPU_SHUTTING_DOWN.fetch_add(1, Ordering::AcqRel) + 1 == cpu_count {
        println_debug!("All CPUs are shutting down. Gracefully powering off...");
        shutdown();
    } else {
        println_debug!(
            "CPU {} is shutting down. Waiting for other CPUs...",
            CPU::local().cpuid()
        );

        loop {
            halt();
        }
    }
}

/// Brings up scheduling on the calling core: registers its idle thread,
/// takes over as that thread (the boot path IS the idle thread from here
/// on), then creates and enqueues this core's one work thread before
/// handing off to the scheduler for good.
fn boot_core() -> ! {
    let idle_stack: BoxedStack = Box::new(KernelStack::new());
    Scheduler::register_core(idle_stack, idle_loop);

    // `register_core` leaves the idle thread `Runnable`, not `Running` --
    // nothing has actually switched into it yet, we're still executing on
    // the boot stack standing in for it. Mark it `Running` so the first
    // `reschedule()` on this core finds it in a state it knows how to
    // retire.
    Thread::current().state().set(RawThreadState::Running);

    panic::mark_core_local_ready();

    let main_stack: BoxedStack = Box::new(KernelStack::new());
    let main_thread = Scheduler::create_thread(standard_main_entry, 0, main_stack, None);
    Scheduler::enqueue(main_thread);

    Scheduler::enter();
}

#[eonix_hal::main]
fn kernel_init(mut data: BootStrapData) -> ! {
    setup_memory(&mut data);

    BSP_OK.store(true, Ordering::Release);
    drop(data);

    boot_core();
}

#[eonix_hal::ap_main]
fn kernel_ap_main(_stack_range: PRange) -> ! {
    while !BSP_OK.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }

    println_debug!("AP{} started", CPU::local().cpuid());

    boot_core();
}
