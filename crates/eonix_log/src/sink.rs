//! Log sink registry and per-CPU formatting buffer.
//!
//! Grounded on `original_source/kernel/debug/Log.cpp`: each call formats a
//! message into a buffer (there, a shared `LogBuffer` per core; here, a
//! fixed-size ring per core reached through `#[define_percpu_shared]`) and
//! then tries to drain completed lines out to every registered output.
//! `Log.cpp` uses `TryLock` so a reentrant caller just leaves the drain for
//! whoever already holds it; `eonix_sync::Spin` has no try-lock, so this
//! drains unconditionally under `lock_irq` instead -- the critical section
//! is short (copying a handful of bytes to each sink), so the tradeoff is
//! a little more contention rather than a correctness issue.
use core::fmt::{self, Write};

use alloc::sync::Arc;
use eonix_sync::Spin;
use eonix_sync_rt::SpinIrq as _;

/// An object logs can be written to: a serial port, a framebuffer console,
/// a boot-time ring buffer flushed to disk later, etc. `spec.md` §6 names
/// this trio of operations.
pub trait LogSink: Send + Sync {
    /// Called once, when the sink is registered, and again any time the
    /// sink wants its output cleared (e.g. a framebuffer console on mode
    /// change).
    fn reset(&self);

    /// Write one already-formatted line (without trailing newline).
    fn write(&self, line: &str);

    /// The kernel is about to panic: switch to whatever synchronous,
    /// allocation-free mode this sink needs before the trap frame dump
    /// starts. Called with every other core presumed frozen.
    fn begin_panic(&self);
}

const MAX_SINKS: usize = 4;
const RING_CAPACITY: usize = 4096;
const LINE_SCRATCH: usize = 256;

struct SinkRegistry {
    sinks: [Option<Arc<dyn LogSink>>; MAX_SINKS],
}

impl SinkRegistry {
    const fn new() -> Self {
        Self {
            sinks: [const { None }; MAX_SINKS],
        }
    }
}

static SINKS: Spin<SinkRegistry> = Spin::new(SinkRegistry::new());

/// Registers `sink`, calling its `reset` once it's installed. Returns
/// `false` if every slot is already taken.
pub fn register_sink(sink: Arc<dyn LogSink>) -> bool {
    let mut reg = SINKS.lock_irq();
    for slot in reg.sinks.iter_mut() {
        if slot.is_none() {
            sink.reset();
            *slot = Some(sink);
            return true;
        }
    }
    false
}

fn dispatch_line(line: &str) {
    let reg = SINKS.lock_irq();
    for sink in reg.sinks.iter().flatten() {
        sink.write(line);
    }
}

/// Tells every registered sink a panic is starting, then force-drains
/// every core's buffer (not just the caller's) so nothing formatted
/// before the panic is lost.
pub fn begin_panic() {
    {
        let reg = SINKS.lock_irq();
        for sink in reg.sinks.iter().flatten() {
            sink.begin_panic();
        }
    }
    drain_all();
}

/// A ring of raw bytes written to by `core::fmt::Write` and drained one
/// complete (`\n`-terminated) line at a time. Overwrites the oldest bytes
/// rather than blocking or growing when a core logs faster than it drains.
struct RingBuffer {
    buf: [u8; RING_CAPACITY],
    write_pos: usize,
    read_pos: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; RING_CAPACITY],
            write_pos: 0,
            read_pos: 0,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let idx = self.write_pos % RING_CAPACITY;
            self.buf[idx] = byte;
            self.write_pos += 1;
        }
        if self.write_pos - self.read_pos > RING_CAPACITY {
            self.read_pos = self.write_pos - RING_CAPACITY;
        }
    }

    /// Emits every complete line currently buffered, oldest first, via
    /// `emit`. A trailing partial line (no `\n` yet) is left for the next
    /// drain. Lines longer than `LINE_SCRATCH` are truncated.
    fn drain_lines(&mut self, emit: impl Fn(&str)) {
        let mut scratch = [0u8; LINE_SCRATCH];
        loop {
            let mut newline_at = None;
            let mut pos = self.read_pos;
            while pos < self.write_pos {
                if self.buf[pos % RING_CAPACITY] == b'\n' {
                    newline_at = Some(pos);
                    break;
                }
                pos += 1;
            }

            let Some(newline_at) = newline_at else { break };
            let line_len = (newline_at - self.read_pos).min(LINE_SCRATCH);
            for i in 0..line_len {
                scratch[i] = self.buf[(self.read_pos + i) % RING_CAPACITY];
            }
            self.read_pos = newline_at + 1;

            if let Ok(line) = core::str::from_utf8(&scratch[..line_len]) {
                emit(line);
            }
        }
    }
}

impl Write for RingBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes());
        Ok(())
    }
}

struct RingCell(Spin<RingBuffer>);

impl RingCell {
    const fn new() -> Self {
        Self(Spin::new(RingBuffer::new()))
    }
}

#[eonix_percpu::define_percpu_shared]
static RING: RingCell = RingCell::new();

/// Formats `args` into the calling core's ring buffer, then drains
/// whatever complete lines that produced out to every sink.
pub(crate) fn write_current_cpu(args: fmt::Arguments) {
    let _ = RING.0.lock_irq().write_fmt(args);
    drain_current_cpu();
}

/// Drains the calling core's buffer only. Safe to call from anywhere;
/// cheap no-op if nothing complete is pending.
pub fn drain_current_cpu() {
    RING.0.lock_irq().drain_lines(dispatch_line);
}

/// Drains every core's buffer that has been registered so far. Used by
/// `begin_panic` (other cores are presumed frozen by then) and may also
/// be called periodically from an idle loop to catch lines a core
/// produced without looping back through `write_current_cpu` itself.
pub fn drain_all() {
    for cpuid in 0..eonix_percpu::cpu_count() {
        let Some(ring) = RING.get_for_cpu(cpuid) else {
            continue;
        };
        ring.0.lock_irq().drain_lines(dispatch_line);
    }
}
