//! Kernel debugger core (`spec.md` §4.11): a single global [`DebugProtocol`]
//! + [`DebugTransport`] pair, loaded if config enables it, plus the
//! freeze-all-cores protocol every debug event runs inside.
//!
//! Grounded on `original_source/kernel/debugger/Debugger.cpp`:
//! `Initialize`/`Connect`/`Disconnect`/`NotifyOfEvent`/`DispatchDebugEvent`
//! and its `FreezeAllCpus`/`ThawAllCpus` pair. No header in
//! `original_source/` defines the types this file is built around
//! (`DebugProtocol`, `DebugTransport`, `EventType`, `DebugError`) --
//! they're designed fresh here from the `.cpp` files' call patterns and
//! `spec.md`'s prose, not ported from an existing layout. See
//! `DESIGN.md` for the two scope substitutions this subsystem makes
//! (`IpiSender` in place of a real IPI-send primitive, a spin-iteration
//! interval in place of a wall-clock 10 ms one) and why.
pub mod breakpoint;
pub mod gdb;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use eonix_log::{println_debug, println_info, println_warn};
use eonix_sync::{LazyLock, Spin};

use crate::config::{read_config_bool, read_config_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RequestConnect,
    RequestDisconnect,
    AddTransport,
    CpuException,
    Interrupt,
    Ipi,
}

impl EventType {
    fn as_str(self) -> &'static str {
        match self {
            EventType::RequestConnect => "request-connect",
            EventType::RequestDisconnect => "request-disconnect",
            EventType::AddTransport => "add-transport",
            EventType::CpuException => "cpu-exception",
            EventType::Interrupt => "interrupt",
            EventType::Ipi => "ipi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugError {
    /// `npk.debugger.enable` is off, or no config-selected protocol
    /// matched a known one.
    NotSupported,
    /// No transport has been registered, or `initialize` was never
    /// called.
    BadEnvironment,
    /// E.g. `connect` while already connected.
    InvalidArgument,
}

pub type DebugResult = Result<(), DebugError>;

/// Moves bytes to/from the debug host. Implemented by the platform layer
/// (e.g. a dedicated UART or a packet-framed network link).
pub trait DebugTransport: Send + Sync {
    fn send(&self, buf: &[u8]) -> bool;
    /// Reads into `buf`, returning the number of bytes actually read.
    /// `0` means "nothing available right now", not end-of-stream.
    fn receive(&self, buf: &mut [u8]) -> usize;
}

/// Interprets and fulfills host commands against a transport.
/// `connect`/`disconnect` drive the session handshake; everything after
/// that (single-stepping, memory peek/poke, register read) is a
/// protocol-specific command loop layered on top, not part of this
/// trait -- `spec.md` only requires the session lifecycle and the
/// freeze/thaw envelope it runs inside.
pub trait DebugProtocol: Send + Sync {
    fn name(&self) -> &'static str;
    fn connect(&self, transport: &dyn DebugTransport) -> DebugResult;
    fn disconnect(&self, transport: &dyn DebugTransport);
}

/// Sends an interprocessor interrupt asking `cpu_id` to call
/// [`notify_of_event`] with `EventType::Ipi`. No interrupt controller
/// driver in this tree sends IPIs yet (`DESIGN.md`'s scheduler section
/// notes the same gap for cross-core wakeup) -- `freeze_all_cpus` still
/// degrades correctly with nothing wired up here, it just has nobody to
/// ping, which is indistinguishable from every other core already being
/// frozen on a single-core boot.
pub trait IpiSender: Send + Sync {
    fn send_ipi(&self, cpu_id: usize);
}

struct NullIpiSender;
impl IpiSender for NullIpiSender {
    fn send_ipi(&self, _cpu_id: usize) {}
}

/// Which event types the current session will act on. `Debugger.cpp`
/// keeps this as a plain bitmask rather than an allow-list structure;
/// kept the same way here since the set is small and fixed.
#[derive(Clone, Copy, Default)]
struct AllowedEvents(u8);

impl AllowedEvents {
    fn bit(event: EventType) -> u8 {
        match event {
            EventType::RequestConnect => 1 << 0,
            EventType::RequestDisconnect => 1 << 1,
            EventType::AddTransport => 1 << 2,
            EventType::CpuException => 1 << 3,
            EventType::Interrupt => 1 << 4,
            EventType::Ipi => 1 << 5,
        }
    }

    fn has(self, event: EventType) -> bool {
        self.0 & Self::bit(event) != 0
    }

    fn set(&mut self, event: EventType) {
        self.0 |= Self::bit(event);
    }

    fn clear(&mut self, event: EventType) {
        self.0 &= !Self::bit(event);
    }

    fn reset_to_disconnected(&mut self) {
        self.0 = Self::bit(EventType::RequestConnect) | Self::bit(EventType::AddTransport);
    }
}

struct DebuggerState {
    initialized: bool,
    connected: bool,
    cpu_count: usize,
    allowed: AllowedEvents,
    protocol: Option<Arc<dyn DebugProtocol>>,
    transport: Option<Arc<dyn DebugTransport>>,
    ipi_sender: Arc<dyn IpiSender>,
}

static STATE: LazyLock<Spin<DebuggerState>> = LazyLock::new(|| {
    Spin::new(DebuggerState {
        initialized: false,
        connected: false,
        cpu_count: 0,
        allowed: AllowedEvents::default(),
        protocol: None,
        transport: None,
        ipi_sender: Arc::new(NullIpiSender),
    })
});

/// `Debugger.cpp`'s `freezingCount`: how many cores still haven't
/// acknowledged the current freeze request. Kept outside `STATE` since
/// cores spin-waiting on it in [`notify_of_event`] must not also be
/// fighting over `STATE`'s lock to do so.
static FREEZING_COUNT: AtomicUsize = AtomicUsize::new(0);

/// How many `spin_loop` iterations [`freeze_all_cpus`] waits between
/// re-pinging cores that haven't yet acked. Substitutes for
/// `Debugger.cpp`'s literal 10 ms repeat interval -- no clock/timer
/// subsystem exists anywhere in this tree yet (`eonix_runtime`'s
/// `Waitable` has the same pre-existing gap) -- so progress is paced by
/// spin count rather than wall time. Tuned to "a lot, but not a hang":
/// real IPI delivery is microseconds, so this only ever matters when
/// `ipi_sender` is the null fallback and a core that should be awake
/// never acks, in which case retrying forever is the correct behavior
/// anyway.
const FREEZE_REPING_SPINS: u32 = 100_000;

/// Registers `transport` as the debugger's single I/O channel. Must be
/// called before [`initialize`], mirroring `Debugger.cpp`'s
/// `AddTransport` (`EventType::AddTransport` exists so a future
/// multi-transport design has a hook; this tree only ever has one).
pub fn add_transport(transport: Arc<dyn DebugTransport>) {
    STATE.lock().transport = Some(transport);
}

/// Registers the platform's IPI-send mechanism. Defaults to a no-op
/// sender if never called (see [`IpiSender`]'s doc comment).
pub fn set_ipi_sender(sender: Arc<dyn IpiSender>) {
    STATE.lock().ipi_sender = sender;
}

/// `Debugger.cpp`'s `Initialize`: reads `npk.debugger.enable`,
/// `npk.debugger.protocol`, and `npk.debugger.auto_connect` from
/// [`crate::config`], resolves the named protocol, and connects
/// immediately if asked to. Returns `Err(NotSupported)` without touching
/// any state if debugging is disabled -- the expected case on a
/// production boot.
pub fn initialize(num_cpus: usize) -> DebugResult {
    if !read_config_bool("npk.debugger.enable", false) {
        return Err(DebugError::NotSupported);
    }

    let protocol_name = read_config_string("npk.debugger.protocol", "gdb");
    let protocol: Arc<dyn DebugProtocol> = match protocol_name.as_str() {
        "gdb" => Arc::new(gdb::GdbProtocol::new()),
        other => {
            println_warn!("debugger: unknown protocol \"{}\"", other);
            return Err(DebugError::BadEnvironment);
        }
    };

    {
        let mut state = STATE.lock();
        if state.transport.is_none() {
            println_warn!("debugger: no transport registered, refusing to initialize");
            return Err(DebugError::BadEnvironment);
        }

        state.protocol = Some(protocol);
        state.cpu_count = num_cpus;
        state.allowed.reset_to_disconnected();
        state.initialized = true;
        state.connected = false;
    }
    FREEZING_COUNT.store(0, Ordering::Relaxed);

    println_info!(
        "debugger: initialized ({} cpu(s), protocol={})",
        num_cpus,
        protocol_name
    );

    if read_config_bool("npk.debugger.auto_connect", true) {
        return connect();
    }
    Ok(())
}

/// `Debugger.cpp`'s `Connect`.
pub fn connect() -> DebugResult {
    {
        let state = STATE.lock();
        if !state.initialized {
            return Err(DebugError::NotSupported);
        }
        if !state.allowed.has(EventType::RequestConnect) {
            return Err(DebugError::InvalidArgument);
        }
    }
    dispatch_debug_event(EventType::RequestConnect)
}

/// `Debugger.cpp`'s `Disconnect`.
pub fn disconnect() {
    {
        let state = STATE.lock();
        if !state.initialized || !state.allowed.has(EventType::RequestDisconnect) {
            return;
        }
    }
    let _ = dispatch_debug_event(EventType::RequestDisconnect);
}

/// `Debugger.cpp`'s `NotifyOfEvent`: the entry point every core calls
/// when it observes `event` (an exception it took, an IPI it received,
/// ...). If a freeze is in progress, first decrements [`FREEZING_COUNT`]
/// and spin-waits for it to return to zero (the instigating core's
/// [`freeze_all_cpus`]/[`thaw_all_cpus`] pair drives that transition).
/// Otherwise, if `event` is currently allowed, this core becomes the
/// instigator and runs [`dispatch_debug_event`] itself.
///
/// The allowed-event dispatch path here is scoped to session-lifecycle
/// events (`RequestConnect`/`RequestDisconnect`); `CpuException` /
/// `Interrupt` / `Ipi` only participate in the freeze/thaw handshake in
/// this tree -- a real stop-and-report-why command loop needs captured
/// trap context this tree's trap handlers don't yet hand to the
/// debugger, which is a further-out piece than `spec.md`'s explicitly
/// named freeze protocol and breakpoint registry.
pub fn notify_of_event(event: EventType) {
    let count = FREEZING_COUNT.load(Ordering::Acquire);
    if count != 0 {
        FREEZING_COUNT.fetch_sub(1, Ordering::AcqRel);
        while FREEZING_COUNT.load(Ordering::Acquire) != 0 {
            core::hint::spin_loop();
        }
        return;
    }

    let allowed = STATE.lock().allowed.has(event);
    if !allowed {
        return;
    }
    if matches!(event, EventType::RequestConnect | EventType::RequestDisconnect) {
        let _ = dispatch_debug_event(event);
    }
}

/// `Debugger.cpp`'s `DispatchDebugEvent`: freezes every other core,
/// performs the one action `event` names, thaws, and returns the
/// outcome. Must not call into any subsystem whose own code might
/// currently be sitting on a breakpoint -- no `println!`-style logging
/// through the general console path mid-freeze, no lock beyond this
/// module's own `Spin`, no allocation. The `println_debug!` calls below
/// happen strictly before/after the freeze window, never inside it.
fn dispatch_debug_event(event: EventType) -> DebugResult {
    let (protocol, transport, already_connected) = {
        let state = STATE.lock();
        if !state.initialized {
            return Err(DebugError::NotSupported);
        }
        (state.protocol.clone(), state.transport.clone(), state.connected)
    };
    let (Some(protocol), Some(transport)) = (protocol, transport) else {
        return Err(DebugError::BadEnvironment);
    };

    println_debug!("debugger: dispatching event {}", event.as_str());

    freeze_all_cpus();

    let result = match event {
        EventType::RequestConnect => {
            if already_connected {
                Err(DebugError::InvalidArgument)
            } else {
                protocol.connect(transport.as_ref())
            }
        }
        EventType::RequestDisconnect => {
            if !already_connected {
                Err(DebugError::InvalidArgument)
            } else {
                protocol.disconnect(transport.as_ref());
                Ok(())
            }
        }
        _ => Err(DebugError::NotSupported),
    };

    thaw_all_cpus();

    if let Ok(()) = result {
        let mut state = STATE.lock();
        match event {
            EventType::RequestConnect => {
                state.connected = true;
                state.allowed.clear(EventType::RequestConnect);
                state.allowed.set(EventType::RequestDisconnect);
                state.allowed.set(EventType::CpuException);
                state.allowed.set(EventType::Interrupt);
                state.allowed.set(EventType::Ipi);
            }
            EventType::RequestDisconnect => {
                state.connected = false;
                state.allowed.reset_to_disconnected();
            }
            _ => {}
        }
    }

    println_debug!(
        "debugger: event {} -> {}",
        event.as_str(),
        if result.is_ok() { "ok" } else { "failed" }
    );
    result
}

/// `Debugger.cpp`'s `FreezeAllCpus`: sets `freezingCount = cpuCount`,
/// then repeatedly pings every other core (to catch ones that hadn't
/// yet registered an IPI id when the first ping went out) until only
/// this, the instigating core, is left unaccounted for.
fn freeze_all_cpus() {
    let (cpu_count, sender) = {
        let state = STATE.lock();
        (state.cpu_count, state.ipi_sender.clone())
    };
    freeze_with(cpu_count, sender.as_ref());
}

fn freeze_with(cpu_count: usize, sender: &dyn IpiSender) {
    FREEZING_COUNT.store(cpu_count, Ordering::Release);

    while FREEZING_COUNT.load(Ordering::Acquire) > 1 {
        for cpu_id in 0..cpu_count {
            sender.send_ipi(cpu_id);
        }
        for _ in 0..FREEZE_REPING_SPINS {
            if FREEZING_COUNT.load(Ordering::Acquire) <= 1 {
                break;
            }
            core::hint::spin_loop();
        }
    }
}

/// `Debugger.cpp`'s `ThawAllCpus`: releases every core spin-waiting in
/// [`notify_of_event`].
fn thaw_all_cpus() {
    FREEZING_COUNT.store(0, Ordering::Release);
}

/// Freezes every other core via the same IPI-then-spin protocol
/// [`dispatch_debug_event`] uses, independent of whether a debug session
/// is active. Grounded on `Panic.cpp`'s `BeginPanic`, which calls
/// `FreezeAllCpus` unconditionally -- a panicking core wants every other
/// core stopped before it prints a word, whether or not anyone's
/// attached with a debugger. `cpu_count` is supplied by the caller
/// (`panic.rs` reads the real `CPU_COUNT`) rather than taken from this
/// module's own `STATE`, since a panic can happen before `initialize`
/// has ever run.
pub fn freeze_other_cores(cpu_count: usize) {
    let sender = STATE.lock().ipi_sender.clone();
    freeze_with(cpu_count, sender.as_ref());
}

/// Releases every core [`freeze_other_cores`] froze. Safe to call even
/// if nothing is actually frozen (`FREEZING_COUNT` is already `0`).
pub fn thaw_other_cores() {
    thaw_all_cpus();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    struct CountingIpiSender(AtomicUsize);
    impl IpiSender for CountingIpiSender {
        fn send_ipi(&self, _cpu_id: usize) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn allowed_events_start_with_only_connect_and_add_transport() {
        let mut allowed = AllowedEvents::default();
        assert!(!allowed.has(EventType::RequestConnect));
        allowed.reset_to_disconnected();
        assert!(allowed.has(EventType::RequestConnect));
        assert!(allowed.has(EventType::AddTransport));
        assert!(!allowed.has(EventType::CpuException));
    }

    #[test]
    fn freeze_then_thaw_releases_a_single_core_wait() {
        set_ipi_sender(Arc::new(CountingIpiSender(AtomicUsize::new(0))));
        STATE.lock().cpu_count = 1;

        freeze_all_cpus();
        assert_eq!(FREEZING_COUNT.load(Ordering::Acquire), 1);
        thaw_all_cpus();
        assert_eq!(FREEZING_COUNT.load(Ordering::Acquire), 0);
    }

    #[test]
    fn initialize_without_enable_is_not_supported() {
        assert_eq!(initialize(1), Err(DebugError::NotSupported));
    }
}
