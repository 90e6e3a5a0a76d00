// src/kernel/core/traits.rs
//! Device abstraction traits.

use super::result::KernelResult;

/// Base trait for device drivers.
pub trait Device {
    /// Human-readable device name, used in boot logs.
    fn name(&self) -> &'static str;

    /// Initialize the device.
    fn init(&mut self) -> KernelResult<()>;

    /// Reset the device to its initial state.
    fn reset(&mut self) -> KernelResult<()> {
        self.init()
    }
}

/// Byte-oriented devices (serial port, VGA console, keyboard).
pub trait CharDevice: Device {
    /// Non-blocking single-byte read; `None` when nothing is pending.
    fn read_byte(&mut self) -> KernelResult<Option<u8>>;

    /// Write a single byte.
    fn write_byte(&mut self, byte: u8) -> KernelResult<()>;

    /// Write a buffer; the default loops over [`CharDevice::write_byte`].
    fn write_bytes(&mut self, buf: &[u8]) -> KernelResult<usize> {
        for &byte in buf {
            self.write_byte(byte)?;
        }
        Ok(buf.len())
    }
}
