// src/arch/x86_64/mod.rs

//! x86-64 support: descriptor tables, interrupt plumbing, the fast-syscall
//! entry and port I/O.

#[cfg(target_os = "none")]
pub mod boot;
pub mod cpu;
pub mod gdt;
pub mod interrupts;
pub mod pic;
pub mod port;
pub mod qemu;
pub mod syscall;

pub use cpu::X86Cpu;

use x86_64::VirtAddr;

/// Point the privileged-stack machinery at a new kernel stack.
///
/// Called on every context switch with the incoming process's kernel stack
/// top, so that both interrupt-driven Ring 3 → Ring 0 transitions (TSS RSP0)
/// and the fast-syscall entry land on the right stack.
pub fn set_kernel_stack(top: VirtAddr) {
    gdt::set_tss_rsp0(top);
    syscall::set_kernel_stack(top);
}
