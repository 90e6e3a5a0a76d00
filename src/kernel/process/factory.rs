// src/kernel/process/factory.rs
//! User-process factory.
//!
//! `create_user` builds everything a Ring 3 process needs — address space,
//! code image, user stack, PCB, seeded kernel stack — and enqueues it READY.
//! Every failure path unwinds the allocations made so far: dropping the
//! `AddressSpace` returns all mapped frames and tables.

use x86_64::structures::paging::{FrameDeallocator, PageTableFlags, PhysFrame};
use x86_64::VirtAddr;

use crate::kernel::core::{KernelResult, MemoryError, Pid, ProcessError};
use crate::kernel::mm::frame::{self, GlobalFrameAllocator};
use crate::kernel::mm::{
    phys_to_virt, AddressSpace, PAGE_SIZE, USER_CODE_BASE, USER_STACK_SIZE, USER_STACK_TOP,
};
use crate::kernel::process::{context, ProcessFlags};
use crate::kernel::sched;

/// Cap on flat image size.
const MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

/// Create a user process from a flat code image.
///
/// The image is loaded at [`USER_CODE_BASE`], which is also the entry point
/// (flat binaries, no relocation); the tail of the last page is zeroed, so
/// the image needs no BSS section. The stack is mapped just below
/// [`USER_STACK_TOP`], writable and non-executable.
pub fn create_user(name: &str, image: &[u8]) -> KernelResult<Pid> {
    if image.is_empty() || image.len() > MAX_IMAGE_SIZE {
        return Err(ProcessError::InvalidImage.into());
    }

    let mut space = AddressSpace::create()?;
    load_image(&mut space, image)?;
    map_user_stack(&mut space)?;

    sched::with_kernel(move |sched, table| {
        let parent = sched.current();
        let pcb = table.allocate(name, ProcessFlags::USER)?;
        pcb.parent_pid = parent;
        pcb.address_space = Some(space);
        pcb.user_entry = VirtAddr::new(USER_CODE_BASE);
        pcb.user_image_size = image.len();
        pcb.user_stack_base = VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE);
        // 16-byte aligned, just below the top of the mapped region.
        pcb.user_stack_top = VirtAddr::new(USER_STACK_TOP - 16);
        context::seed(pcb);

        let pid = pcb.pid();
        sched.make_ready(table, pid);
        Ok(pid)
    })
}

/// Copy `image` into fresh frames and map them read-only executable at
/// [`USER_CODE_BASE`], preserving the base address's intra-page offset.
fn load_image(space: &mut AddressSpace, image: &[u8]) -> KernelResult<()> {
    let base = USER_CODE_BASE;
    let page_offset = (base % PAGE_SIZE as u64) as usize;
    let total = page_offset + image.len();
    let page_count = total.div_ceil(PAGE_SIZE);

    let mut copied = 0usize;
    for page_index in 0..page_count {
        let frame = alloc_frame()?;
        zero_frame(frame);

        // First page starts at the intra-page offset; later pages at 0.
        let dst_offset = if page_index == 0 { page_offset } else { 0 };
        let chunk = (PAGE_SIZE - dst_offset).min(image.len() - copied);

        // SAFETY: the frame is fresh and reached through the direct map;
        // dst_offset + chunk <= PAGE_SIZE.
        unsafe {
            let dst = phys_to_virt(frame.start_address())
                .as_mut_ptr::<u8>()
                .add(dst_offset);
            core::ptr::copy_nonoverlapping(image.as_ptr().add(copied), dst, chunk);
        }
        copied += chunk;

        let vaddr = VirtAddr::new(base - page_offset as u64 + (page_index * PAGE_SIZE) as u64);
        // Code pages: present, user, executable, not writable.
        if let Err(e) = space.map_user(vaddr, frame, PageTableFlags::empty()) {
            release_frame(frame);
            return Err(e);
        }
    }

    Ok(())
}

/// Map the user stack region below [`USER_STACK_TOP`]: writable,
/// non-executable, zeroed.
fn map_user_stack(space: &mut AddressSpace) -> KernelResult<()> {
    let pages = (USER_STACK_SIZE as usize) / PAGE_SIZE;
    let bottom = USER_STACK_TOP - USER_STACK_SIZE;

    for page_index in 0..pages {
        let frame = alloc_frame()?;
        zero_frame(frame);

        let vaddr = VirtAddr::new(bottom + (page_index * PAGE_SIZE) as u64);
        let flags = PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;
        if let Err(e) = space.map_user(vaddr, frame, flags) {
            release_frame(frame);
            return Err(e);
        }
    }

    Ok(())
}

fn alloc_frame() -> KernelResult<PhysFrame> {
    use x86_64::structures::paging::FrameAllocator;
    frame::with_allocator(|a| a.allocate_frame())?.ok_or_else(|| MemoryError::OutOfFrames.into())
}

fn release_frame(frame: PhysFrame) {
    // SAFETY: the frame was allocated above and never mapped.
    unsafe {
        GlobalFrameAllocator.deallocate_frame(frame);
    }
}

fn zero_frame(frame: PhysFrame) {
    // SAFETY: fresh frame, reached through the direct map.
    unsafe {
        core::ptr::write_bytes(phys_to_virt(frame.start_address()).as_mut_ptr::<u8>(), 0, PAGE_SIZE);
    }
}
