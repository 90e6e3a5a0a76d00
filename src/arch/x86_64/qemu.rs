// src/arch/x86_64/qemu.rs

//! QEMU `isa-debug-exit` support for automated runs.

use crate::arch::x86_64::port::PortWriteOnly;

/// Exit codes understood by QEMU's ISA debug exit device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    /// Signal that the run completed successfully.
    Success = 0x10,
    /// Signal that something failed.
    Failed = 0x11,
}

/// Write the exit code to QEMU's debug exit port and halt.
///
/// Outside QEMU the write is a no-op and the CPU simply halts forever.
pub fn exit_qemu(code: QemuExitCode) -> ! {
    // SAFETY: Port 0xF4 is the QEMU ISA debug exit device; writing to it is
    // harmless on real hardware and exits the emulator with the given status.
    unsafe {
        let mut port = PortWriteOnly::<u8>::new(0xF4);
        port.write(code as u32 as u8);
    }

    crate::hlt_loop()
}
