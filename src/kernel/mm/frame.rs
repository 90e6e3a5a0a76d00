// src/kernel/mm/frame.rs
//! Physical frame allocator.
//!
//! A bump allocator over the usable RAM region handed over at boot, with an
//! intrusive free list threaded through returned frames (the first eight
//! bytes of a free frame store the physical address of the next one).

use spin::Mutex;
use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};
use x86_64::PhysAddr;

use super::{phys_to_virt, PAGE_SIZE};
use crate::kernel::core::{ErrorKind, KernelError, KernelResult};

/// Sentinel terminating the free list.
const FREE_LIST_END: u64 = 0;

/// Bump-plus-free-list allocator over one contiguous region.
pub struct RegionFrameAllocator {
    next: PhysAddr,
    end: PhysAddr,
    free_head: u64,
    allocated: u64,
}

impl RegionFrameAllocator {
    /// Manage the frames in `[start, end)`; both bounds are aligned inward.
    pub fn new(start: PhysAddr, end: PhysAddr) -> Self {
        Self {
            next: start.align_up(PAGE_SIZE as u64),
            end: end.align_down(PAGE_SIZE as u64),
            free_head: FREE_LIST_END,
            allocated: 0,
        }
    }

    /// Number of frames currently handed out.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    fn bump(&mut self) -> Option<PhysFrame> {
        if self.next >= self.end {
            return None;
        }
        let frame = PhysFrame::containing_address(self.next);
        self.next += PAGE_SIZE as u64;
        Some(frame)
    }

    /// Allocate `count` physically contiguous frames (bump region only;
    /// freed frames are never coalesced). Used for the kernel heap.
    pub fn allocate_contiguous(&mut self, count: u64) -> Option<PhysFrame> {
        let bytes = count * PAGE_SIZE as u64;
        if self.next + bytes > self.end {
            return None;
        }
        let frame = PhysFrame::containing_address(self.next);
        self.next += bytes;
        self.allocated += count;
        Some(frame)
    }
}

unsafe impl FrameAllocator<Size4KiB> for RegionFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let frame = if self.free_head != FREE_LIST_END {
            let frame = PhysFrame::containing_address(PhysAddr::new(self.free_head));
            // SAFETY: free-listed frames are unused RAM; their first word
            // holds the next link, written by deallocate_frame below.
            self.free_head = unsafe {
                core::ptr::read_volatile(phys_to_virt(frame.start_address()).as_ptr::<u64>())
            };
            Some(frame)
        } else {
            self.bump()
        };

        if frame.is_some() {
            self.allocated += 1;
        }
        frame
    }
}

impl FrameDeallocator<Size4KiB> for RegionFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame) {
        // SAFETY: the caller guarantees the frame is no longer referenced;
        // we repurpose its first word as the free-list link.
        unsafe {
            core::ptr::write_volatile(
                phys_to_virt(frame.start_address()).as_mut_ptr::<u64>(),
                self.free_head,
            );
        }
        self.free_head = frame.start_address().as_u64();
        self.allocated -= 1;
    }
}

/// Global frame allocator, populated by [`init`] during boot.
pub static FRAME_ALLOCATOR: Mutex<Option<RegionFrameAllocator>> = Mutex::new(None);

/// Hand the usable RAM region to the global allocator.
pub fn init(start: PhysAddr, end: PhysAddr) {
    *FRAME_ALLOCATOR.lock() = Some(RegionFrameAllocator::new(start, end));
}

/// Run `f` with the global allocator.
pub fn with_allocator<R>(
    f: impl FnOnce(&mut RegionFrameAllocator) -> R,
) -> KernelResult<R> {
    let mut guard = FRAME_ALLOCATOR.lock();
    let alloc = guard
        .as_mut()
        .ok_or(KernelError::with_context(
            ErrorKind::ResourceUnavailable,
            "frame allocator not initialized",
        ))?;
    Ok(f(alloc))
}

/// Zero-sized adapter so `Mapper::map_to` can pull frames from the global
/// allocator for intermediate page tables.
pub struct GlobalFrameAllocator;

unsafe impl FrameAllocator<Size4KiB> for GlobalFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        FRAME_ALLOCATOR.lock().as_mut()?.allocate_frame()
    }
}

impl FrameDeallocator<Size4KiB> for GlobalFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame) {
        if let Some(alloc) = FRAME_ALLOCATOR.lock().as_mut() {
            // SAFETY: forwarded contract.
            unsafe { alloc.deallocate_frame(frame) }
        }
    }
}
