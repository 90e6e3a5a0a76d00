// src/arch/x86_64/syscall.rs

//! Fast-syscall (syscall/sysret) entry for Ring 3 → Ring 0 transitions.
//!
//! The `syscall` instruction loads kernel CS/SS from STAR and jumps to the
//! LSTAR entry point, but leaves RSP pointing at the *user* stack. The entry
//! stub therefore swaps to the current process's kernel stack before it
//! touches memory, saves the user continuation, and only then re-enables
//! interrupts.

#![allow(unsafe_op_in_unsafe_fn)] // naked_asm! bodies

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86_64::gdt;
use crate::debug_println;
use x86_64::VirtAddr;
use x86_64::registers::model_specific::{Efer, EferFlags, LStar, SFMask, Star};
use x86_64::registers::rflags::RFlags;

/// Kernel stack top of the running process; rewritten on every context
/// switch. Read from the entry stub before any push is possible.
static CURRENT_KERNEL_STACK: AtomicU64 = AtomicU64::new(0);

/// One-slot parking space for the user RSP between the moment `syscall`
/// lands in the stub and the moment it is pushed onto the kernel stack.
/// Safe on a single CPU because the window runs with interrupts masked
/// (SFMASK clears IF).
static USER_RSP_SCRATCH: AtomicU64 = AtomicU64::new(0);

/// Point the entry stub at a new kernel stack.
pub fn set_kernel_stack(top: VirtAddr) {
    CURRENT_KERNEL_STACK.store(top.as_u64(), Ordering::Relaxed);
}

/// Program the fast-syscall MSRs.
///
/// Enables `syscall`/`sysret` in EFER, installs the segment layout in STAR,
/// the entry stub in LSTAR, and masks the interrupt flag for the transition
/// window via SFMASK.
pub fn init() {
    unsafe {
        Efer::update(|flags| {
            *flags |= EferFlags::SYSTEM_CALL_EXTENSIONS;
        });

        let selectors = gdt::selectors();
        Star::write(
            selectors.user_code,
            selectors.user_data,
            selectors.kernel_code,
            selectors.kernel_data,
        )
        .expect("GDT layout incompatible with STAR");

        LStar::write(VirtAddr::new(syscall_entry as *const () as u64));
        SFMask::write(RFlags::INTERRUPT_FLAG);
    }

    debug_println!("[OK] fast-syscall MSRs programmed");
    debug_println!("  LSTAR: {:#x}", syscall_entry as *const () as u64);
}

/// Registers saved by the entry stub on the kernel stack, lowest address
/// first. The stub's push/pop sequences and these field offsets must stay
/// in lockstep:
///
/// | offset | field |
/// |---|---|
/// | 0x00 | r15 |
/// | 0x08 | r14 |
/// | 0x10 | r13 |
/// | 0x18 | r12 |
/// | 0x20 | rbx |
/// | 0x28 | rbp |
/// | 0x30 | rflags (user R11) |
/// | 0x38 | rip (user RCX) |
/// | 0x40 | user rsp |
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SyscallFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub rflags: u64,
    pub rip: u64,
    pub user_rsp: u64,
}

/// Syscall entry point.
///
/// Register contract on entry (fixed by the hardware and the user ABI):
/// - RAX: syscall number
/// - RDI, RSI, RDX, R10, R8, R9: arguments 1-6
/// - RCX: user RIP, R11: user RFLAGS (both saved by the CPU)
/// - RSP: still the user stack
///
/// The stub swaps stacks, builds a [`SyscallFrame`], re-enables interrupts,
/// shuffles the arguments into the C ABI, calls the dispatcher, and unwinds
/// back to user mode with `sysretq`.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() -> ! {
    core::arch::naked_asm!(
        // Interrupts are masked (SFMASK); park the user RSP and swap stacks.
        "mov [rip + {user_rsp}], rsp",
        "mov rsp, [rip + {kernel_stack}]",
        // Build the SyscallFrame (see struct docs for the layout).
        "push qword ptr [rip + {user_rsp}]",
        "push rcx",
        "push r11",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        // Critical swap done; the kernel stack is live again.
        "sti",
        // dispatch(num, a1, a2, a3, a4, a5, a6) per the System V ABI; the
        // seventh argument travels on the stack.
        "push r9",
        "mov r9, r8",
        "mov r8, r10",
        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",
        "call {handler}",
        "add rsp, 8",
        // Close the window before standing on the user stack again.
        "cli",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "pop r11",
        "pop rcx",
        "pop rsp",
        // sysretq: RIP ← RCX, RFLAGS ← R11, CS/SS from STAR.
        "sysretq",
        user_rsp = sym USER_RSP_SCRATCH,
        kernel_stack = sym CURRENT_KERNEL_STACK,
        handler = sym syscall_rust_entry,
    );
}

/// C-ABI landing pad between the entry stub and the dispatcher.
extern "C" fn syscall_rust_entry(
    num: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    a5: u64,
    a6: u64,
) -> i64 {
    crate::kernel::syscall::dispatch(num, a1, a2, a3, a4, a5, a6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn syscall_frame_layout_matches_stub() {
        assert_eq!(size_of::<SyscallFrame>(), 9 * 8);
        assert_eq!(offset_of!(SyscallFrame, r15), 0x00);
        assert_eq!(offset_of!(SyscallFrame, r14), 0x08);
        assert_eq!(offset_of!(SyscallFrame, r13), 0x10);
        assert_eq!(offset_of!(SyscallFrame, r12), 0x18);
        assert_eq!(offset_of!(SyscallFrame, rbx), 0x20);
        assert_eq!(offset_of!(SyscallFrame, rbp), 0x28);
        assert_eq!(offset_of!(SyscallFrame, rflags), 0x30);
        assert_eq!(offset_of!(SyscallFrame, rip), 0x38);
        assert_eq!(offset_of!(SyscallFrame, user_rsp), 0x40);
    }
}
