// src/kernel/process/context.rs
//! Context switching.
//!
//! A context is nothing but a saved kernel stack pointer: the callee-saved
//! registers live on the stack itself, in the layout of [`ContextFrame`].
//! New processes get a hand-built frame whose return address is a trampoline
//! that finishes the transition (interrupt enable for kernel threads, the
//! iretq descent to Ring 3 for user processes).

#![allow(unsafe_op_in_unsafe_fn)] // naked_asm! bodies

use x86_64::VirtAddr;

use crate::kernel::core::Pid;
use crate::kernel::process::Pcb;

/// Saved execution state: the kernel stack pointer at the moment of switch.
/// Valid only while the owning process is READY or BLOCKED.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub rsp: u64,
}

impl Context {
    #[must_use]
    pub const fn empty() -> Self {
        Self { rsp: 0 }
    }
}

/// The register block [`switch_ctx`] leaves on the stack, lowest address
/// first:
///
/// | offset | field |
/// |---|---|
/// | 0x00 | r15 |
/// | 0x08 | r14 |
/// | 0x10 | r13 |
/// | 0x18 | r12 |
/// | 0x20 | rbp |
/// | 0x28 | rbx |
/// | 0x30 | rip (return address) |
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ContextFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rip: u64,
}

/// Switch kernel stacks: save the callee-saved registers and stack pointer
/// of the current context into `prev`, then resume `next`.
///
/// Returns when something later switches back to `prev`; execution resumes
/// at whatever return address tops the restored stack.
///
/// # Safety
///
/// `next` must hold a stack pointer produced by this function or by
/// [`seed`], and the stack it names must be live and exclusively owned.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_ctx(prev: *mut Context, next: *const Context) {
    core::arch::naked_asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
    );
}

/// One-way variant of [`switch_ctx`] for contexts that must not be saved
/// (the exit path: the current stack is about to be reclaimed).
///
/// # Safety
///
/// Same requirements on `next` as [`switch_ctx`]; the current stack is
/// abandoned.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to(next: *const Context) -> ! {
    core::arch::naked_asm!(
        "mov rsp, [rdi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
    );
}

/// Prepare a never-run PCB's kernel stack so that the first switch into it
/// "returns" into the right trampoline.
///
/// Layout written at the stack top (which is 16-byte aligned):
///
/// ```text
/// top - 0x08: 0            fake caller slot, keeps the trampoline's
///                          entry alignment at rsp % 16 == 8
/// top - 0x40: ContextFrame rip = trampoline, registers zeroed
/// ```
pub fn seed(pcb: &mut Pcb) {
    let trampoline: unsafe extern "C" fn() -> ! = if pcb.is_user() {
        user_entry_trampoline
    } else {
        kernel_thread_trampoline
    };

    let top = pcb.kstack_top.as_u64();
    debug_assert!(top != 0, "seeding a PCB without a kernel stack");
    debug_assert_eq!(top % 16, 0);

    let frame = ContextFrame {
        r15: 0,
        r14: 0,
        r13: 0,
        r12: 0,
        rbp: 0,
        rbx: 0,
        rip: trampoline as usize as u64,
    };

    // SAFETY: the stack is freshly allocated and exclusively owned by this
    // PCB; both writes land inside it.
    unsafe {
        core::ptr::write((top - 8) as *mut u64, 0);
        core::ptr::write((top - 64) as *mut ContextFrame, frame);
    }

    pcb.context.rsp = top - 64;
}

/// First code of every kernel thread: pick up the entry function, enable
/// interrupts, run, and exit with the thread's return.
unsafe extern "C" fn kernel_thread_trampoline() -> ! {
    let entry = crate::kernel::sched::with_kernel(|sched, table| {
        let pcb = table
            .lookup(sched.current())
            .expect("trampoline: current process vanished");
        pcb.kernel_entry
            .expect("trampoline: kernel thread without entry")
    });

    x86_64::instructions::interrupts::enable();
    entry();

    crate::kernel::sched::exit(0);
}

/// First code of every user process: install the address space, then build
/// an interrupt-return frame and drop to Ring 3.
unsafe extern "C" fn user_entry_trampoline() -> ! {
    let (entry, user_rsp) = crate::kernel::sched::with_kernel(|sched, table| {
        let pcb = table
            .lookup(sched.current())
            .expect("trampoline: current process vanished");
        let space = pcb
            .address_space
            .as_ref()
            .expect("trampoline: user process without address space");
        // SAFETY: the space carries the shared kernel half, so kernel
        // execution continues unaffected after the CR3 write.
        unsafe {
            space.switch();
        }
        (pcb.user_entry, pcb.user_stack_top)
    });

    // SAFETY: entry/stack were validated by the factory; segments and the
    // iretq frame below are the only supported road into Ring 3.
    unsafe { enter_user(entry, user_rsp) }
}

/// Build the iretq frame and execute the return to Ring 3.
///
/// The pushed RFLAGS has IF set, so the process starts with interrupts
/// enabled. Scratch registers are cleared so no kernel values leak.
///
/// # Safety
///
/// `entry` must point at mapped, executable user code and `user_rsp` at a
/// mapped, writable user stack inside the installed address space.
#[unsafe(naked)]
unsafe extern "C" fn enter_user(entry: VirtAddr, user_rsp: VirtAddr) -> ! {
    core::arch::naked_asm!(
        "mov ax, {user_ss}",
        "mov ds, ax",
        "mov es, ax",
        "push {user_ss}",   // SS
        "push rsi",         // user RSP
        "push {rflags}",    // RFLAGS: IF | reserved bit 1
        "push {user_cs}",   // CS
        "push rdi",         // RIP
        "xor eax, eax",
        "xor ebx, ebx",
        "xor ecx, ecx",
        "xor edx, edx",
        "xor esi, esi",
        "xor edi, edi",
        "xor ebp, ebp",
        "xor r8d, r8d",
        "xor r9d, r9d",
        "xor r10d, r10d",
        "xor r11d, r11d",
        "xor r12d, r12d",
        "xor r13d, r13d",
        "xor r14d, r14d",
        "xor r15d, r15d",
        "iretq",
        user_ss = const crate::arch::x86_64::gdt::USER_DATA_SELECTOR as u64,
        user_cs = const crate::arch::x86_64::gdt::USER_CODE_SELECTOR as u64,
        rflags = const 0x202u64,
    );
}

/// Resolve the raw context pointers for a switch from `prev` to `next`.
///
/// Raw pointers are required because the table lock must be dropped before
/// [`switch_ctx`] runs; slot storage is stable (fixed arena in a static),
/// so the pointers stay valid.
pub(crate) fn resolve_switch(
    table: &mut crate::kernel::process::ProcessTable,
    prev: Pid,
    next: Pid,
) -> (*mut Context, *const Context, VirtAddr) {
    let next_pcb = table
        .lookup(next)
        .expect("switch target vanished from the table");
    assert!(
        next_pcb.state == crate::kernel::process::ProcessState::Running,
        "switching to a process that is not RUNNING (pid {})",
        next
    );
    let next_ctx = &next_pcb.context as *const Context;
    let next_kstack = next_pcb.kstack_top;

    let prev_pcb = table
        .lookup_mut(prev)
        .expect("switch source vanished from the table");
    let prev_ctx = &mut prev_pcb.context as *mut Context;

    (prev_ctx, next_ctx, next_kstack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn context_frame_layout_matches_switch_stub() {
        assert_eq!(size_of::<ContextFrame>(), 7 * 8);
        assert_eq!(offset_of!(ContextFrame, r15), 0x00);
        assert_eq!(offset_of!(ContextFrame, r14), 0x08);
        assert_eq!(offset_of!(ContextFrame, r13), 0x10);
        assert_eq!(offset_of!(ContextFrame, r12), 0x18);
        assert_eq!(offset_of!(ContextFrame, rbp), 0x20);
        assert_eq!(offset_of!(ContextFrame, rbx), 0x28);
        assert_eq!(offset_of!(ContextFrame, rip), 0x30);
    }

    #[test]
    fn seeded_stack_keeps_abi_alignment() {
        use crate::kernel::process::{ProcessFlags, ProcessTable};

        let mut table = ProcessTable::new();
        let pcb = table.allocate("seeded", ProcessFlags::empty()).unwrap();
        pcb.kernel_entry = Some(|| {});
        seed(pcb);

        let top = pcb.kstack_top.as_u64();
        assert_eq!(pcb.context.rsp, top - 64);
        // After six pops and the ret, the trampoline starts with
        // rsp == top - 8, i.e. rsp % 16 == 8 as the C ABI expects.
        assert_eq!((top - 8) % 16, 8);
    }

    // State for the switch-identity round trip. Only the test below touches
    // these; the trampoline reaches them via `sym` because it must not
    // disturb any callee-saved register to pass arguments.
    static mut IDENTITY_CTX_A: Context = Context::empty();
    static mut IDENTITY_CTX_B: Context = Context::empty();

    /// Lands via the seeded frame with the sentinels live in the register
    /// file, then immediately switches back. `lea`/`call` clobber only
    /// caller-saved registers, so the sentinels travel through the second
    /// save untouched.
    #[unsafe(naked)]
    unsafe extern "C" fn identity_trampoline() -> ! {
        core::arch::naked_asm!(
            "lea rdi, [rip + {ctx_b}]",
            "lea rsi, [rip + {ctx_a}]",
            "call {switch}",
            "ud2",
            ctx_b = sym IDENTITY_CTX_B,
            ctx_a = sym IDENTITY_CTX_A,
            switch = sym switch_ctx,
        );
    }

    #[test]
    fn switch_identity_round_trips_callee_saved_registers() {
        use core::ptr::{addr_of, addr_of_mut};

        use crate::kernel::process::{OwnedStack, KERNEL_STACK_SIZE};

        const SENTINELS: [u64; 6] = [
            0x1515_1515_1515_1515, // r15
            0x1414_1414_1414_1414, // r14
            0x1313_1313_1313_1313, // r13
            0x1212_1212_1212_1212, // r12
            0xb9b9_b9b9_b9b9_b9b9, // rbp
            0xb1b1_b1b1_b1b1_b1b1, // rbx
        ];

        let stack = OwnedStack::new(KERNEL_STACK_SIZE).unwrap();
        let top = stack.top().as_u64();
        let frame = ContextFrame {
            r15: SENTINELS[0],
            r14: SENTINELS[1],
            r13: SENTINELS[2],
            r12: SENTINELS[3],
            rbp: SENTINELS[4],
            rbx: SENTINELS[5],
            rip: identity_trampoline as usize as u64,
        };

        // SAFETY: the fake stack is exclusively owned; the trampoline
        // switches straight back to this context, so the test thread
        // resumes right after the first switch_ctx with its own register
        // file intact (switch_ctx keeps the extern "C" contract).
        unsafe {
            core::ptr::write((top - 8) as *mut u64, 0);
            core::ptr::write((top - 64) as *mut ContextFrame, frame);
            core::ptr::write(addr_of_mut!(IDENTITY_CTX_B), Context { rsp: top - 64 });

            switch_ctx(addr_of_mut!(IDENTITY_CTX_A), addr_of!(IDENTITY_CTX_B));

            // switch(a, b) popped the sentinels into the registers;
            // switch(b, a) pushed them back out. Same depth, same bits.
            let saved_rsp = core::ptr::read(addr_of!(IDENTITY_CTX_B)).rsp;
            assert_eq!(saved_rsp, top - 64);
            let saved = core::ptr::read(saved_rsp as *const ContextFrame);
            assert_eq!(
                [saved.r15, saved.r14, saved.r13, saved.r12, saved.rbp, saved.rbx],
                SENTINELS
            );
        }
    }
}
