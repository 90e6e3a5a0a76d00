// src/kernel/mm/mod.rs
//! Memory management: layout constants, the physical frame allocator, the
//! kernel heap, and per-process address spaces.

pub mod address_space;
pub mod allocator;
pub mod frame;

pub use address_space::AddressSpace;

use x86_64::{PhysAddr, VirtAddr};

/// Page size used throughout (4 KiB only).
pub const PAGE_SIZE: usize = 4096;

/// Base of the direct physical-memory map in the kernel half. Established
/// by the boot shim; every address space shares it via the copied kernel
/// PML4 entries.
pub const PHYS_MEM_OFFSET: u64 = 0xFFFF_8000_0000_0000;

/// First address past user space (start of the non-canonical hole).
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Where user code images are loaded.
pub const USER_CODE_BASE: u64 = 0x40_0000;

/// Top of the user stack region (exclusive).
pub const USER_STACK_TOP: u64 = 0x7000_0000_0000;

/// User stack size in bytes.
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// Translate a physical address through the direct map.
#[inline]
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u64() + PHYS_MEM_OFFSET)
}
