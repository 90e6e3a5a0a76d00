// src/kernel/driver/console.rs
//! Console multiplexer.
//!
//! `write(1)`/`write(2)` and the console macros land here; the sink behind
//! the mux is chosen once at initialization. The `Capture` sink records
//! bytes into a fixed ring so tests can observe exactly what a syscall
//! emitted without VGA hardware.

use core::fmt;
use spin::{Mutex, Once};

/// Bytes retained by the capture sink.
pub const CAPTURE_CAPACITY: usize = 256;

/// A fixed-size byte recorder.
pub struct CaptureBuffer {
    buf: [u8; CAPTURE_CAPACITY],
    len: usize,
}

impl CaptureBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; CAPTURE_CAPACITY],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.len < CAPTURE_CAPACITY {
            self.buf[self.len] = byte;
            self.len += 1;
        }
    }

    /// Copy out the captured bytes and reset.
    pub fn take(&mut self, out: &mut [u8]) -> usize {
        let n = self.len.min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.len = 0;
        n
    }
}

/// The sink behind the console mux.
pub enum ConsoleSink {
    /// VGA text mode.
    Vga,
    /// In-memory recorder for tests.
    Capture(CaptureBuffer),
}

/// Global console, set once at boot (or by a test harness).
pub static CONSOLE: Once<Mutex<ConsoleSink>> = Once::new();

/// Route console output to VGA. Called during boot after `init_vga`.
pub fn init_console() {
    CONSOLE.call_once(|| Mutex::new(ConsoleSink::Vga));
}

/// Route console output to an in-memory capture buffer.
///
/// First caller wins; boot and capture initialization are mutually
/// exclusive within one kernel instance.
pub fn init_capture() {
    CONSOLE.call_once(|| Mutex::new(ConsoleSink::Capture(CaptureBuffer::new())));
}

/// Write one byte to the console.
///
/// Bytes written before the console is initialized are dropped.
pub fn put_byte(byte: u8) {
    if let Some(console) = CONSOLE.get() {
        match &mut *console.lock() {
            ConsoleSink::Vga => {
                if let Some(vga) = super::vga::VGA.get() {
                    vga.lock().put_byte(byte);
                }
            }
            ConsoleSink::Capture(buf) => buf.push(byte),
        }
    }
}

/// Drain the capture sink into `out`, returning the byte count.
///
/// Returns 0 when the console is not in capture mode.
pub fn take_captured(out: &mut [u8]) -> usize {
    if let Some(console) = CONSOLE.get() {
        if let ConsoleSink::Capture(buf) = &mut *console.lock() {
            return buf.take(out);
        }
    }
    0
}

struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            put_byte(byte);
        }
        Ok(())
    }
}

/// Formatted write to the console (backs `console_print!`).
pub fn write_console(args: fmt::Arguments) {
    use fmt::Write;
    let _ = ConsoleWriter.write_fmt(args);
}

/// Formatted write to the serial debug channel (backs `debug_print!`).
///
/// Best-effort by design: dropped when COM1 is absent, uninitialized, or
/// its lock is held (a panic inside a serial write must not deadlock on
/// its own diagnostic channel).
pub fn write_debug(args: fmt::Arguments) {
    use fmt::Write;
    if super::serial::is_available() {
        if let Some(mut serial) = super::serial::SERIAL1.try_lock() {
            let _ = serial.write_fmt(args);
        }
    }
}
