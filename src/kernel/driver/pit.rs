// src/kernel/driver/pit.rs
//! 8254 Programmable Interval Timer.
//!
//! Channel 0 drives IRQ 0 at [`PIT_HZ`]; the scheduler owns the tick counter
//! itself, this driver only programs the divisor.

use crate::arch::x86_64::port::{Port, PortWriteOnly};
use crate::kernel::core::{Device, KernelResult};
use spin::Mutex;

/// PIT input clock (Hz).
const PIT_INPUT_FREQUENCY: u32 = 1_193_182;

/// Scheduler tick rate: 100 Hz, one tick every 10 ms.
pub const PIT_HZ: u32 = 100;

/// Milliseconds per tick at [`PIT_HZ`].
pub const MS_PER_TICK: u64 = 1000 / PIT_HZ as u64;

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND_PORT: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 3 (square wave), binary.
const COMMAND_CHANNEL0_MODE3: u8 = 0x36;

/// 8254 driver, channel 0 only.
pub struct ProgrammableIntervalTimer {
    channel0: Port<u8>,
    command: PortWriteOnly<u8>,
}

impl ProgrammableIntervalTimer {
    pub const fn new() -> Self {
        Self {
            channel0: Port::new(CHANNEL0_DATA),
            command: PortWriteOnly::new(COMMAND_PORT),
        }
    }

    /// Program channel 0 for a periodic interrupt at `freq` Hz.
    pub fn set_frequency(&mut self, freq: u32) -> KernelResult<()> {
        let divisor = (PIT_INPUT_FREQUENCY / freq).min(65535) as u16;

        // SAFETY: the standard PC/AT timer programming sequence; command
        // byte first, then the divisor low/high on the channel port.
        unsafe {
            self.command.write(COMMAND_CHANNEL0_MODE3);
            self.channel0.write((divisor & 0xFF) as u8);
            self.channel0.write((divisor >> 8) as u8);
        }

        Ok(())
    }
}

impl Device for ProgrammableIntervalTimer {
    fn name(&self) -> &'static str {
        "Intel 8254 PIT"
    }

    fn init(&mut self) -> KernelResult<()> {
        self.set_frequency(PIT_HZ)
    }
}

/// Global PIT instance.
pub static PIT: Mutex<ProgrammableIntervalTimer> = Mutex::new(ProgrammableIntervalTimer::new());
