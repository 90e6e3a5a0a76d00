// src/kernel/mm/address_space.rs
//! Per-process address spaces.
//!
//! Every address space shares the kernel's higher half (PML4 entries
//! 256..512, copied at creation); the lower half belongs to exactly one
//! process. Installing a root into CR3 is the serialization point that
//! retires any TLB entries of the previous space.

use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::mapper::MapToError;
use x86_64::structures::paging::{
    FrameAllocator, Mapper, OffsetPageTable, Page, PageTable, PageTableFlags, PhysFrame,
    Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

use super::frame::{self, GlobalFrameAllocator};
use super::{phys_to_virt, USER_SPACE_END};
use crate::kernel::core::{ErrorKind, KernelError, KernelResult, MemoryError};

/// Flags for intermediate page tables on the user side: the USER bit must be
/// set at every level for Ring 3 to reach the leaf.
const PARENT_TABLE_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

/// Borrow a page table through the direct map.
///
/// # Safety
///
/// `frame` must hold a page table and the caller must respect aliasing
/// (no two live `&mut` to the same table).
unsafe fn table_mut<'a>(frame: PhysFrame) -> &'a mut PageTable {
    unsafe { &mut *phys_to_virt(frame.start_address()).as_mut_ptr::<PageTable>() }
}

unsafe fn table_ref<'a>(frame: PhysFrame) -> &'a PageTable {
    unsafe { &*phys_to_virt(frame.start_address()).as_ptr::<PageTable>() }
}

/// The boot page-table root, shared by idle and all kernel threads.
static KERNEL_ROOT: spin::Once<PhysFrame> = spin::Once::new();

/// Record the currently installed root as the kernel root. Called once
/// during boot, before any user address space exists.
pub fn init_kernel_root() {
    KERNEL_ROOT.call_once(|| Cr3::read().0);
}

/// The kernel page-table root.
#[must_use]
pub fn kernel_root() -> PhysFrame {
    *KERNEL_ROOT.get().expect("kernel root not recorded")
}

/// Install an arbitrary root into CR3.
///
/// # Safety
///
/// The root must map the kernel half (every root created by
/// [`AddressSpace::create`] and the kernel root do).
pub unsafe fn install_root(root: PhysFrame) {
    unsafe {
        Cr3::write(root, Cr3Flags::empty());
    }
}

/// Install the kernel root into CR3.
///
/// # Safety
///
/// See [`install_root`].
pub unsafe fn install_kernel_root() {
    unsafe {
        install_root(kernel_root());
    }
}

/// Handle to one process's page-table root.
pub struct AddressSpace {
    root: PhysFrame,
}

impl AddressSpace {
    /// Allocate a fresh root and copy the kernel half from the currently
    /// installed tables.
    pub fn create() -> KernelResult<Self> {
        let root = frame::with_allocator(|a| a.allocate_frame())?
            .ok_or(MemoryError::OutOfFrames)?;

        // SAFETY: the frame was just allocated; nobody else references it.
        let table = unsafe { table_mut(root) };
        table.zero();

        let (kernel_root, _) = Cr3::read();
        // SAFETY: read-only view of the live kernel tables.
        let kernel_table = unsafe { table_ref(kernel_root) };
        for i in 256..512 {
            table[i] = kernel_table[i].clone();
        }

        Ok(Self { root })
    }

    /// The root page-table frame (the CR3 value for this space).
    #[must_use]
    pub fn root(&self) -> PhysFrame {
        self.root
    }

    /// Whether this space is currently installed in CR3.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        Cr3::read().0 == self.root
    }

    /// Install this space into CR3.
    ///
    /// Writing CR3 implicitly invalidates non-global TLB entries of the
    /// previous space.
    ///
    /// # Safety
    ///
    /// All kernel code and data reachable after the write must be mapped in
    /// this space; the kernel-half copy at creation guarantees that as long
    /// as the kernel's own mappings never change afterwards.
    pub unsafe fn switch(&self) {
        unsafe {
            Cr3::write(self.root, Cr3Flags::empty());
        }
    }

    fn mapper(&mut self) -> OffsetPageTable<'_> {
        // SAFETY: we own the root; the offset mapping covers all physical
        // memory the tables can reference.
        unsafe {
            OffsetPageTable::new(table_mut(self.root), VirtAddr::new(super::PHYS_MEM_OFFSET))
        }
    }

    /// Map one 4 KiB user page.
    ///
    /// `vaddr` must be page-aligned and below [`USER_SPACE_END`]; the USER
    /// and PRESENT bits are forced on. Pass `WRITABLE` / `NO_EXECUTE` as
    /// appropriate for data pages.
    pub fn map_user(
        &mut self,
        vaddr: VirtAddr,
        frame: PhysFrame,
        flags: PageTableFlags,
    ) -> KernelResult<()> {
        if vaddr.as_u64() >= USER_SPACE_END {
            return Err(KernelError::with_context(
                ErrorKind::Memory(MemoryError::InvalidAddress),
                "map_user refuses kernel-half addresses",
            ));
        }

        let page = Page::<Size4KiB>::from_start_address(vaddr)
            .map_err(|_| KernelError::from(MemoryError::InvalidAddress))?;
        let flags = flags | PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;

        let mut mapper = self.mapper();
        // SAFETY: the frame is owned by this address space from here on;
        // intermediate tables come from the global frame allocator.
        let flush = unsafe {
            mapper.map_to_with_table_flags(
                page,
                frame,
                flags,
                PARENT_TABLE_FLAGS,
                &mut GlobalFrameAllocator,
            )
        };

        match flush {
            Ok(flush) => {
                flush.flush();
                Ok(())
            }
            Err(MapToError::FrameAllocationFailed) => Err(MemoryError::OutOfFrames.into()),
            Err(MapToError::PageAlreadyMapped(_)) => Err(MemoryError::AlreadyMapped.into()),
            Err(MapToError::ParentEntryHugePage) => Err(MemoryError::InvalidAddress.into()),
        }
    }

    /// Walk the tables read-only and translate `vaddr`.
    #[must_use]
    pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        self.translate_with_flags(vaddr).map(|(addr, _)| addr)
    }

    /// Translate `vaddr`, also returning the leaf entry's flags.
    ///
    /// Only 4 KiB leaves are followed; the user half never contains huge
    /// pages.
    #[must_use]
    pub fn translate_with_flags(&self, vaddr: VirtAddr) -> Option<(PhysAddr, PageTableFlags)> {
        let indices = [
            u16::from(vaddr.p4_index()) as usize,
            u16::from(vaddr.p3_index()) as usize,
            u16::from(vaddr.p2_index()) as usize,
        ];

        let mut frame = self.root;
        for index in indices {
            // SAFETY: read-only walk through tables owned by this space.
            let table = unsafe { table_ref(frame) };
            let entry = &table[index];
            let flags = entry.flags();
            if !flags.contains(PageTableFlags::PRESENT)
                || flags.contains(PageTableFlags::HUGE_PAGE)
            {
                return None;
            }
            frame = PhysFrame::containing_address(entry.addr());
        }

        // SAFETY: as above.
        let l1 = unsafe { table_ref(frame) };
        let entry = &l1[u16::from(vaddr.p1_index()) as usize];
        let flags = entry.flags();
        if !flags.contains(PageTableFlags::PRESENT) {
            return None;
        }
        Some((entry.addr() + u64::from(vaddr.page_offset()), flags))
    }

    /// Whether `vaddr` resolves to a present, user-accessible page.
    #[must_use]
    pub fn user_accessible(&self, vaddr: VirtAddr) -> bool {
        self.translate_with_flags(vaddr)
            .is_some_and(|(_, flags)| flags.contains(PageTableFlags::USER_ACCESSIBLE))
    }
}

impl Drop for AddressSpace {
    /// Free all user-half page tables and leaf frames, then the root.
    fn drop(&mut self) {
        assert!(
            !self.is_installed(),
            "destroying the installed address space"
        );

        use x86_64::structures::paging::FrameDeallocator;
        let mut dealloc = GlobalFrameAllocator;

        // SAFETY: the space is not installed and has a single owner; every
        // frame referenced below was allocated for these tables.
        unsafe {
            let l4 = table_mut(self.root);
            for l4e in l4.iter().take(256) {
                if !l4e.flags().contains(PageTableFlags::PRESENT) {
                    continue;
                }
                let l3_frame = PhysFrame::containing_address(l4e.addr());
                let l3 = table_ref(l3_frame);
                for l3e in l3.iter() {
                    if !l3e.flags().contains(PageTableFlags::PRESENT) {
                        continue;
                    }
                    let l2_frame = PhysFrame::containing_address(l3e.addr());
                    let l2 = table_ref(l2_frame);
                    for l2e in l2.iter() {
                        if !l2e.flags().contains(PageTableFlags::PRESENT) {
                            continue;
                        }
                        let l1_frame = PhysFrame::containing_address(l2e.addr());
                        let l1 = table_ref(l1_frame);
                        for l1e in l1.iter() {
                            if l1e.flags().contains(PageTableFlags::PRESENT) {
                                dealloc.deallocate_frame(PhysFrame::containing_address(
                                    l1e.addr(),
                                ));
                            }
                        }
                        dealloc.deallocate_frame(l1_frame);
                    }
                    dealloc.deallocate_frame(l2_frame);
                }
                dealloc.deallocate_frame(l3_frame);
            }
            dealloc.deallocate_frame(self.root);
        }
    }
}
