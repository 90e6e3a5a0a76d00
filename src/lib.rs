// src/lib.rs
//! Chanux — a multiboot x86-64 teaching kernel.
//!
//! The crate is split into `arch` (descriptor tables, interrupt entry,
//! fast-syscall entry, port I/O) and `kernel` (drivers, memory, processes,
//! scheduler, syscalls). Everything hardware-independent is written so it can
//! be driven from plain host tests; the pieces that touch the machine are
//! compiled for `target_os = "none"` and exercised under QEMU.

#![no_std]
#![feature(abi_x86_interrupt)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod arch;
pub mod kernel;

use crate::arch::{ArchCpu, Cpu};

// The kernel heap backs the bare-metal image only. Host test binaries link
// std and use its allocator, which keeps the pure subsystems testable
// without bringing up the frame allocator first.
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Hand the heap region to the global allocator.
///
/// # Safety
///
/// `start` must point to `size` bytes of memory that are mapped, writable,
/// and used for nothing else for the lifetime of the kernel. Must be called
/// exactly once.
#[cfg(target_os = "none")]
pub unsafe fn init_heap(start: *mut u8, size: usize) {
    unsafe {
        ALLOCATOR.lock().init(start, size);
    }
}

/// console_print! - user-visible screen output via the console mux
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {{
        $crate::kernel::driver::write_console(format_args!($($arg)*));
    }};
}

/// console_println! - user-visible screen output, with newline
#[macro_export]
macro_rules! console_println {
    () => ($crate::console_print!("\n"));
    ($($arg:tt)*) => ($crate::console_print!("{}\n", format_args!($($arg)*)));
}

/// debug_print! - debug-only output (serial port, COM1)
///
/// Safe to use from the earliest boot stages; silently dropped when no
/// serial hardware is present or initialized.
#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {{
        $crate::kernel::driver::write_debug(format_args!($($arg)*));
    }};
}

/// debug_println! - debug-only output, with newline
#[macro_export]
macro_rules! debug_println {
    () => ($crate::debug_print!("\n"));
    ($($arg:tt)*) => ($crate::debug_print!("{}\n", format_args!($($arg)*)));
}

/// println! - both console and serial
#[macro_export]
macro_rules! println {
    () => {{
        $crate::console_print!("\n");
        $crate::debug_print!("\n");
    }};
    ($($arg:tt)*) => {{
        $crate::console_print!("{}\n", format_args!($($arg)*));
        $crate::debug_print!("{}\n", format_args!($($arg)*));
    }};
}

/// print! - both console and serial
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::console_print!($($arg)*);
        $crate::debug_print!($($arg)*);
    }};
}

/// Halt forever; the CPU wakes for interrupts and goes straight back to
/// sleep.
#[inline]
pub fn hlt_loop() -> ! {
    loop {
        ArchCpu::halt();
    }
}
