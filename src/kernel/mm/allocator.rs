// src/kernel/mm/allocator.rs
//! Kernel heap setup.
//!
//! The heap lives in a physically contiguous region taken from the frame
//! allocator and reached through the direct map, so no extra page-table
//! work is needed before the first allocation.

/// Kernel heap size: 1 MiB.
pub const HEAP_SIZE: usize = 1024 * 1024;

/// Carve the heap out of physical memory and hand it to the global
/// allocator.
///
/// Must run after frame-allocator init and before the first use of `alloc`.
#[cfg(target_os = "none")]
pub fn init_heap() -> crate::kernel::core::KernelResult<()> {
    use super::{frame, phys_to_virt, PAGE_SIZE};
    use crate::kernel::core::MemoryError;

    let frames = (HEAP_SIZE / PAGE_SIZE) as u64;
    let start = frame::with_allocator(|a| a.allocate_contiguous(frames))?
        .ok_or(MemoryError::OutOfFrames)?;

    let heap_start = phys_to_virt(start.start_address()).as_mut_ptr::<u8>();
    // SAFETY: the region was just reserved from the frame allocator, is
    // mapped through the direct map, and is handed to the heap exactly once.
    unsafe {
        crate::init_heap(heap_start, HEAP_SIZE);
    }

    Ok(())
}
