// src/kernel/driver/serial.rs
//! COM1 serial driver, the kernel's debug channel.
//!
//! 38400 baud, 8 data bits, no parity, 1 stop bit. Output is best-effort:
//! when no UART responds on COM1 the driver marks itself absent and every
//! write becomes a no-op, so debug logging is safe on machines without a
//! serial port.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86_64::port::{Port, PortReadOnly, PortWriteOnly};
use crate::kernel::core::{CharDevice, Device, DeviceError, KernelResult};
use spin::Mutex;

/// COM1 base I/O port.
const COM1_BASE: u16 = 0x3F8;

/// Register offsets from the base port.
mod register_offset {
    pub const DATA: u16 = 0;
    pub const INTERRUPT_ENABLE: u16 = 1;
    pub const FIFO_CONTROL: u16 = 2;
    pub const LINE_CONTROL: u16 = 3;
    pub const MODEM_CONTROL: u16 = 4;
    pub const LINE_STATUS: u16 = 5;
    pub const SCRATCH: u16 = 7;
}

/// Line Control Register bits.
mod line_control {
    /// Divisor Latch Access Bit.
    pub const DLAB_ENABLE: u8 = 0x80;
    /// 8 data bits, no parity, 1 stop bit.
    pub const CONFIG_8N1: u8 = 0x03;
}

/// Line Status Register bits.
mod line_status {
    pub const DATA_READY: u8 = 0x01;
    pub const TRANSMIT_EMPTY: u8 = 0x20;
}

/// 115200 / 38400 = 3.
const BAUD_DIVISOR: u16 = 3;

/// Bound on transmit-ready spin loops; iteration-based, so the wall-clock
/// timeout scales with CPU speed.
const TIMEOUT_ITERATIONS: u32 = 100_000;

static SERIAL_AVAILABLE: AtomicBool = AtomicBool::new(false);

/// A 16550-compatible UART on a fixed base port.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    fn reg_write(&mut self, offset: u16, value: u8) {
        // SAFETY: offsets stay within the UART's 8-register window.
        unsafe {
            PortWriteOnly::<u8>::new(self.base + offset).write(value);
        }
    }

    fn reg_read(&self, offset: u16) -> u8 {
        // SAFETY: offsets stay within the UART's 8-register window.
        unsafe { PortReadOnly::<u8>::new(self.base + offset).read() }
    }

    /// Probe for the UART with the scratch register, then program 8N1 at
    /// 38400 baud with FIFOs enabled.
    fn init_hardware(&mut self) -> KernelResult<()> {
        // No UART: the scratch register won't hold a value.
        self.reg_write(register_offset::SCRATCH, 0x55);
        if self.reg_read(register_offset::SCRATCH) != 0x55 {
            return Err(DeviceError::NotFound.into());
        }

        self.reg_write(register_offset::INTERRUPT_ENABLE, 0x00);

        self.reg_write(register_offset::LINE_CONTROL, line_control::DLAB_ENABLE);
        self.reg_write(register_offset::DATA, (BAUD_DIVISOR & 0xFF) as u8);
        self.reg_write(register_offset::INTERRUPT_ENABLE, (BAUD_DIVISOR >> 8) as u8);
        self.reg_write(register_offset::LINE_CONTROL, line_control::CONFIG_8N1);

        // Enable FIFOs, clear them, 14-byte threshold.
        self.reg_write(register_offset::FIFO_CONTROL, 0xC7);
        // DTR + RTS + OUT2.
        self.reg_write(register_offset::MODEM_CONTROL, 0x0B);

        Ok(())
    }

    fn transmit_ready(&self) -> bool {
        self.reg_read(register_offset::LINE_STATUS) & line_status::TRANSMIT_EMPTY != 0
    }
}

impl Device for SerialPort {
    fn name(&self) -> &'static str {
        "COM1 16550 UART"
    }

    fn init(&mut self) -> KernelResult<()> {
        let result = self.init_hardware();
        SERIAL_AVAILABLE.store(result.is_ok(), Ordering::Release);
        result
    }
}

impl CharDevice for SerialPort {
    fn read_byte(&mut self) -> KernelResult<Option<u8>> {
        if self.reg_read(register_offset::LINE_STATUS) & line_status::DATA_READY != 0 {
            Ok(Some(self.reg_read(register_offset::DATA)))
        } else {
            Ok(None)
        }
    }

    fn write_byte(&mut self, byte: u8) -> KernelResult<()> {
        let mut spins = 0;
        while !self.transmit_ready() {
            spins += 1;
            if spins > TIMEOUT_ITERATIONS {
                return Err(DeviceError::Timeout.into());
            }
            core::hint::spin_loop();
        }

        let mut data = Port::<u8>::new(self.base + register_offset::DATA);
        // SAFETY: transmit buffer is empty; writing the data register sends
        // one byte.
        unsafe {
            data.write(byte);
        }
        Ok(())
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            // CRLF translation for terminal emulators.
            if byte == b'\n' {
                self.write_byte(b'\r').map_err(|_| fmt::Error)?;
            }
            self.write_byte(byte).map_err(|_| fmt::Error)?;
        }
        Ok(())
    }
}

/// Global COM1 instance.
pub static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1_BASE));

/// Whether COM1 probing succeeded.
pub fn is_available() -> bool {
    SERIAL_AVAILABLE.load(Ordering::Acquire)
}
