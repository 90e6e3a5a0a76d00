// src/arch/x86_64/gdt.rs

//! Global Descriptor Table and Task State Segment.
//!
//! Segment layout (fixed, the fast-syscall MSRs depend on it):
//!
//! | index | selector | segment |
//! |---|---|---|
//! | 1 | 0x08 | kernel code (Ring 0) |
//! | 2 | 0x10 | kernel data (Ring 0) |
//! | 3 | 0x18 (0x1b with RPL 3) | user data (Ring 3) |
//! | 4 | 0x20 (0x23 with RPL 3) | user code (Ring 3) |
//! | 5 | 0x28 | TSS |
//!
//! User data sits *below* user code because `sysretq` derives CS and SS from
//! a single STAR base (SS = base + 8, CS = base + 16).

use lazy_static::lazy_static;
use x86_64::VirtAddr;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;

/// IST slot used by the double-fault handler.
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

/// User code selector with RPL 3, as pushed by the iretq trampoline.
pub const USER_CODE_SELECTOR: u16 = 0x23;
/// User data/stack selector with RPL 3.
pub const USER_DATA_SELECTOR: u16 = 0x1b;

const FAULT_STACK_SIZE: usize = 4096 * 5;

#[repr(C, align(4096))]
struct AlignedStack {
    data: [u8; FAULT_STACK_SIZE],
}

static mut DOUBLE_FAULT_STACK: AlignedStack = AlignedStack {
    data: [0; FAULT_STACK_SIZE],
};

static mut TSS: TaskStateSegment = TaskStateSegment::new();

/// Selectors handed out by the GDT.
pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub tss: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();

        let kernel_code = gdt.append(Descriptor::kernel_code_segment());
        let kernel_data = gdt.append(Descriptor::kernel_data_segment());
        let user_data = gdt.append(Descriptor::user_data_segment());
        let user_code = gdt.append(Descriptor::user_code_segment());

        let tss = gdt.append(Descriptor::tss_segment(unsafe {
            &*core::ptr::addr_of!(TSS)
        }));

        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_data,
                user_code,
                tss,
            },
        )
    };
}

/// Get the segment selectors.
pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Install the GDT and TSS.
pub fn init() {
    use x86_64::instructions::segmentation::{CS, Segment};
    use x86_64::instructions::tables::load_tss;

    unsafe {
        TSS.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            let stack_start = VirtAddr::from_ptr(core::ptr::addr_of!(DOUBLE_FAULT_STACK));
            stack_start + (FAULT_STACK_SIZE as u64)
        };

        GDT.0.load();
        CS::set_reg(GDT.1.kernel_code);
        load_tss(GDT.1.tss);
    }

    debug_assert_eq!(GDT.1.user_code.0, USER_CODE_SELECTOR);
    debug_assert_eq!(GDT.1.user_data.0, USER_DATA_SELECTOR);
}

/// Update the privileged stack pointer (RSP0) in the TSS.
///
/// Ring 3 → Ring 0 transitions through the IDT push their frame onto this
/// stack, so it must always name the kernel stack of the process that is
/// about to run.
pub fn set_tss_rsp0(top: VirtAddr) {
    unsafe {
        let tss = core::ptr::addr_of_mut!(TSS);
        (*tss).privilege_stack_table[0] = top;
    }
}
