// src/arch/x86_64/boot.rs

//! Multiboot v1 header and kernel entry stub.
//!
//! The loader (GRUB, or QEMU's `-kernel`) finds the header below, loads the
//! image, and jumps to `_start` with the magic value in EAX and the physical
//! address of the multiboot information structure in EBX. Long-mode and
//! higher-half setup happen in the loader shim before `_start` runs; by the
//! time we get here the kernel mappings are live.

use core::arch::global_asm;

/// Value a multiboot-compliant loader leaves in EAX.
pub const LOADER_MAGIC: u32 = 0x2BAD_B002;

/// Header magic the loader scans for.
const HEADER_MAGIC: u32 = 0x1BAD_B002;
/// Request page-aligned modules and the memory map.
const HEADER_FLAGS: u32 = 0x3;

global_asm!(
    r#"
.section .multiboot_header, "aw"
.align 4
multiboot_header_start:
    .long {magic}
    .long {flags}
    .long -({magic} + {flags})      // checksum
multiboot_header_end:

.section .bss
.align 16
boot_stack_bottom:
    .skip 32768
boot_stack_top:

.section .text
.global _start
_start:
    lea rsp, [rip + boot_stack_top]
    mov edi, eax                    // multiboot magic
    mov esi, ebx                    // info structure (physical address)
    call kernel_entry
1:  hlt
    jmp 1b
"#,
    magic = const HEADER_MAGIC,
    flags = const HEADER_FLAGS,
);

/// The multiboot information structure, as far as this kernel reads it.
/// Everything past `mem_upper` belongs to the physical-memory manager.
#[repr(C)]
pub struct BootInfo {
    pub flags: u32,
    /// KiB of conventional memory below 1 MiB.
    pub mem_lower: u32,
    /// KiB of memory above 1 MiB.
    pub mem_upper: u32,
}

impl BootInfo {
    /// Bit in `flags` indicating `mem_lower`/`mem_upper` are valid.
    pub const FLAG_MEMINFO: u32 = 1 << 0;

    /// Upper memory size in KiB, if the loader provided it.
    pub fn upper_memory_kib(&self) -> Option<u32> {
        if self.flags & Self::FLAG_MEMINFO != 0 {
            Some(self.mem_upper)
        } else {
            None
        }
    }
}
