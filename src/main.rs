// src/main.rs
//! The bootable kernel image.
//!
//! Built for `x86_64-unknown-none` and loaded by a multiboot loader. On a
//! hosted target this binary only prints a pointer to the build
//! instructions; `cargo test` exercises the library instead.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod image {
    use core::panic::PanicInfo;

    use chanux::arch::x86_64::{boot, gdt, interrupts, pic, syscall};
    use chanux::kernel::core::Device;
    use chanux::kernel::driver::{console, keyboard, pit, serial, vga};
    use chanux::kernel::mm::{address_space, allocator, frame, phys_to_virt};
    use chanux::kernel::{process, sched};
    use chanux::{console_println, debug_println};
    use x86_64::PhysAddr;

    /// Physical memory below this is left to the kernel image and loader
    /// structures; the frame allocator starts here.
    const PHYS_POOL_START: u64 = 16 * 1024 * 1024;

    /// Fallback when the loader provides no memory info: assume 64 MiB.
    const FALLBACK_MEM_KIB: u32 = 64 * 1024;

    /// Flat init image, loaded at `USER_CODE_BASE` by the factory. The
    /// `userland/` crates build real programs for the same contract; this
    /// built-in one keeps the kernel bootable without a prior
    /// cross-compilation step.
    ///
    /// ```text
    ///  0: b8 01 00 00 00        mov  eax, 1          ; write
    ///  5: bf 01 00 00 00        mov  edi, 1          ; fd = stdout
    /// 10: 48 8d 35 15 00 00 00  lea  rsi, [rip+0x15] ; msg
    /// 17: ba 13 00 00 00        mov  edx, 19         ; len
    /// 22: 0f 05                 syscall
    /// 24: b8 05 00 00 00        mov  eax, 5          ; sleep
    /// 29: bf f4 01 00 00        mov  edi, 500        ; ms
    /// 34: 0f 05                 syscall
    /// 36: eb f2                 jmp  24              ; heartbeat loop
    /// 38: "chanux: init alive\n"
    /// ```
    static INIT_IMAGE: &[u8] = &[
        0xb8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
        0xbf, 0x01, 0x00, 0x00, 0x00, // mov edi, 1
        0x48, 0x8d, 0x35, 0x15, 0x00, 0x00, 0x00, // lea rsi, [rip+0x15]
        0xba, 0x13, 0x00, 0x00, 0x00, // mov edx, 19
        0x0f, 0x05, // syscall
        0xb8, 0x05, 0x00, 0x00, 0x00, // mov eax, 5
        0xbf, 0xf4, 0x01, 0x00, 0x00, // mov edi, 500
        0x0f, 0x05, // syscall
        0xeb, 0xf2, // jmp -14
        b'c', b'h', b'a', b'n', b'u', b'x', b':', b' ', b'i', b'n', b'i', b't', b' ', b'a',
        b'l', b'i', b'v', b'e', b'\n',
    ];

    /// Multiboot entry: the `_start` stub in `arch::x86_64::boot` lands
    /// here with the loader's magic and info pointer.
    #[unsafe(no_mangle)]
    pub extern "C" fn kernel_entry(magic: u32, info_addr: u32) -> ! {
        if magic != boot::LOADER_MAGIC {
            panic!("bad multiboot magic: {:#x}", magic);
        }
        kernel_main(info_addr)
    }

    fn bring_up(dev: &mut dyn Device) {
        match dev.init() {
            Ok(()) => debug_println!("[OK] {}", dev.name()),
            Err(e) => debug_println!("[WARN] {}: {}", dev.name(), e),
        }
    }

    fn kernel_main(info_addr: u32) -> ! {
        // Serial first so every later step can log.
        let _ = serial::SERIAL1.lock().init();
        debug_println!("=== chanux {} ===", env!("CARGO_PKG_VERSION"));

        vga::init_vga();
        console::init_console();
        console_println!("chanux {} booting", env!("CARGO_PKG_VERSION"));

        gdt::init();
        debug_println!("[OK] GDT + TSS");
        interrupts::init_idt();
        debug_println!("[OK] IDT");
        // SAFETY: once, before any IRQ is unmasked.
        unsafe {
            pic::PICS.lock().initialize();
        }
        debug_println!("[OK] 8259A PICs remapped to 32/40");

        bring_up(&mut *pit::PIT.lock());
        bring_up(&mut *keyboard::KEYBOARD.lock());

        // Physical memory: the loader's memory info bounds the pool.
        let info = unsafe { &*phys_to_virt(PhysAddr::new(info_addr as u64)).as_ptr::<boot::BootInfo>() };
        let mem_kib = info.upper_memory_kib().unwrap_or(FALLBACK_MEM_KIB);
        let phys_end = 0x10_0000 + mem_kib as u64 * 1024;
        assert!(phys_end > PHYS_POOL_START, "not enough physical memory");
        frame::init(PhysAddr::new(PHYS_POOL_START), PhysAddr::new(phys_end));
        debug_println!(
            "[OK] frame allocator: {:#x}..{:#x}",
            PHYS_POOL_START,
            phys_end
        );

        allocator::init_heap().expect("heap initialization failed");
        debug_println!("[OK] kernel heap ({} KiB)", allocator::HEAP_SIZE / 1024);

        address_space::init_kernel_root();
        syscall::init();
        sched::init();

        // SAFETY: handlers for IRQ 0 and 1 are installed above.
        unsafe {
            let mut pics = pic::PICS.lock();
            pics.unmask_irq(0);
            pics.unmask_irq(1);
        }

        match process::create_user("init", INIT_IMAGE) {
            Ok(pid) => debug_println!("[OK] spawned init (pid {})", pid),
            Err(e) => debug_println!("[WARN] init not spawned: {}", e),
        }

        console_println!("chanux: scheduler online, dropping to idle");
        x86_64::instructions::interrupts::enable();
        chanux::hlt_loop()
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        x86_64::instructions::interrupts::disable();
        debug_println!("\n[PANIC] {}", info);
        console_println!("\n*** kernel panic: {} ***", info);

        #[cfg(feature = "qemu-exit")]
        chanux::arch::x86_64::qemu::exit_qemu(chanux::arch::x86_64::qemu::QemuExitCode::Failed);

        #[cfg(not(feature = "qemu-exit"))]
        chanux::hlt_loop()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("chanux is a kernel: build it with `cargo build --target x86_64-unknown-none`");
    eprintln!("host-side checks live in the library: `cargo test`");
}
