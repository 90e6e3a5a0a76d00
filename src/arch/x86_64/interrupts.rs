// src/arch/x86_64/interrupts.rs

//! Interrupt Descriptor Table and IRQ handlers.
//!
//! The timer handler is the scheduler's preemption hook: it acknowledges the
//! PIC first and then runs the tick, which may context-switch away inside
//! the interrupt and return through another process's kernel stack.

use crate::arch::x86_64::gdt;
use crate::arch::x86_64::pic::{PIC1_OFFSET, PIC2_OFFSET, PICS};
use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

/// IRQ 0 (8254 PIT) vector.
pub const TIMER_VECTOR: u8 = PIC1_OFFSET;
/// IRQ 1 (PS/2 keyboard) vector.
pub const KEYBOARD_VECTOR: u8 = PIC1_OFFSET + 1;
/// IRQ 7 vector; the master PIC raises it spuriously on noise.
pub const SPURIOUS_MASTER_VECTOR: u8 = PIC1_OFFSET + 7;
/// IRQ 15 vector; the slave PIC's spurious line.
pub const SPURIOUS_SLAVE_VECTOR: u8 = PIC2_OFFSET + 7;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_handler);
        idt[TIMER_VECTOR].set_handler_fn(timer_interrupt_handler);
        idt[KEYBOARD_VECTOR].set_handler_fn(keyboard_interrupt_handler);
        idt[SPURIOUS_MASTER_VECTOR].set_handler_fn(spurious_master_handler);
        idt[SPURIOUS_SLAVE_VECTOR].set_handler_fn(spurious_slave_handler);
        idt
    };
}

/// Load the IDT.
pub fn init_idt() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::debug_println!("[EXCEPTION] breakpoint at {:?}", stack_frame.instruction_pointer);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    panic!(
        "double fault (error code {}): {:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn general_protection_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "general protection fault (error code {:#x}): {:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    // User-mode fault reporting as process termination is future work; for
    // now any page fault is fatal to the kernel.
    panic!(
        "page fault at {:?} ({:?}), pid {}: {:#?}",
        Cr2::read(),
        error_code,
        crate::kernel::sched::current_pid().as_u64(),
        stack_frame
    );
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    // EOI before the tick: the tick may switch away and not return here
    // until this process is scheduled again.
    unsafe {
        PICS.lock().notify_end_of_interrupt(TIMER_VECTOR);
    }

    crate::kernel::sched::timer_tick();
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    use crate::kernel::driver::keyboard;

    if let Some(scancode) = keyboard::KEYBOARD.lock().read_scancode() {
        keyboard::handle_scancode(scancode);
    }

    unsafe {
        PICS.lock().notify_end_of_interrupt(KEYBOARD_VECTOR);
    }
}

extern "x86-interrupt" fn spurious_master_handler(_stack_frame: InterruptStackFrame) {
    // Spurious IRQ 7: the in-service bit is clear, so no EOI is owed.
    let mut pics = PICS.lock();
    if pics.irq_in_service(7) {
        unsafe {
            pics.notify_end_of_interrupt(SPURIOUS_MASTER_VECTOR);
        }
    }
}

extern "x86-interrupt" fn spurious_slave_handler(_stack_frame: InterruptStackFrame) {
    // Spurious IRQ 15: same rule on the slave chip.
    let mut pics = PICS.lock();
    if pics.irq_in_service(15) {
        unsafe {
            pics.notify_end_of_interrupt(SPURIOUS_SLAVE_VECTOR);
        }
    }
}
