// src/arch/x86_64/cpu.rs

use crate::arch::Cpu;
use x86_64::instructions::{hlt, interrupts};

/// CPU operations backed by the x86-64 instruction set.
pub struct X86Cpu;

impl Cpu for X86Cpu {
    fn halt() {
        hlt();
    }

    fn disable_interrupts() {
        interrupts::disable();
    }

    fn enable_interrupts() {
        interrupts::enable();
    }

    fn are_interrupts_enabled() -> bool {
        interrupts::are_enabled()
    }
}

/// Run `f` with interrupts masked, restoring the previous interrupt state
/// afterwards.
///
/// Locks shared between interrupt handlers and normal kernel paths must be
/// taken inside such a section, or a handler can spin forever on a lock its
/// own interruptee holds. On hosted targets (unit tests of the lock-free
/// state machines) masking is meaningless and this is a plain call.
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    #[cfg(target_os = "none")]
    {
        interrupts::without_interrupts(f)
    }
    #[cfg(not(target_os = "none"))]
    {
        f()
    }
}
