// src/arch/x86_64/pic.rs

//! 8259A Programmable Interrupt Controller pair (master/slave cascade).

use crate::arch::x86_64::port::{Port, PortWriteOnly};
use spin::Mutex;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: edge-triggered, cascade, expect ICW4.
const ICW1_INIT: u8 = 0x11;
/// ICW4: 8086/88 mode.
const ICW4_8086: u8 = 0x01;
/// OCW2: non-specific end of interrupt.
const PIC_EOI: u8 = 0x20;
/// OCW3: next command-port read returns the In-Service Register.
const OCW3_READ_ISR: u8 = 0x0B;

/// Vector base for the master PIC (IRQ 0..7 → 32..39).
pub const PIC1_OFFSET: u8 = 0x20;
/// Vector base for the slave PIC (IRQ 8..15 → 40..47).
pub const PIC2_OFFSET: u8 = 0x28;

/// The cascaded master/slave pair.
pub struct ChainedPics {
    pics: [Pic; 2],
}

impl ChainedPics {
    #[must_use]
    pub const fn new(offset1: u8, offset2: u8) -> Self {
        Self {
            pics: [
                Pic {
                    offset: offset1,
                    command: Port::new(PIC1_COMMAND),
                    data: Port::new(PIC1_DATA),
                },
                Pic {
                    offset: offset2,
                    command: Port::new(PIC2_COMMAND),
                    data: Port::new(PIC2_DATA),
                },
            ],
        }
    }

    /// Remap both PICs to their vector offsets and mask every IRQ line
    /// except the cascade (IRQ 2).
    ///
    /// # Safety
    ///
    /// Must run once, before any IRQ line is unmasked, with interrupts
    /// disabled.
    pub unsafe fn initialize(&mut self) {
        // SAFETY: standard 8259A init sequence with an I/O delay between
        // writes; port 0x80 is the conventional POST scratch port.
        unsafe {
            let mut wait_port: PortWriteOnly<u8> = PortWriteOnly::new(0x80);
            let mut wait = || wait_port.write(0);

            self.pics[0].command.write(ICW1_INIT);
            wait();
            self.pics[1].command.write(ICW1_INIT);
            wait();

            // ICW2: vector offsets
            self.pics[0].data.write(self.pics[0].offset);
            wait();
            self.pics[1].data.write(self.pics[1].offset);
            wait();

            // ICW3: slave on IRQ 2, slave identity 2
            self.pics[0].data.write(4);
            wait();
            self.pics[1].data.write(2);
            wait();

            self.pics[0].data.write(ICW4_8086);
            wait();
            self.pics[1].data.write(ICW4_8086);
            wait();

            // Mask everything except the cascade line; drivers unmask their
            // own IRQ once a handler is installed.
            self.pics[0].data.write(0xfb);
            self.pics[1].data.write(0xff);
        }
    }

    /// Signal end-of-interrupt for the given vector.
    ///
    /// # Safety
    ///
    /// Must be called from the handler servicing exactly this vector.
    pub unsafe fn notify_end_of_interrupt(&mut self, vector: u8) {
        // SAFETY: EOI to the PIC(s) that raised the vector; slave IRQs need
        // an EOI on both chips.
        unsafe {
            if self.handles_interrupt(vector) {
                if self.pics[1].handles_interrupt(vector) {
                    self.pics[1].end_of_interrupt();
                }
                self.pics[0].end_of_interrupt();
            }
        }
    }

    /// Read the combined In-Service Register (slave in the high byte).
    ///
    /// A set bit means the corresponding IRQ is being serviced; a spurious
    /// IRQ 7 / IRQ 15 shows up with its bit clear.
    pub fn read_isr(&mut self) -> u16 {
        // SAFETY: OCW3 followed by a command-port read is the documented way
        // to sample the ISR; it has no other side effect.
        unsafe {
            self.pics[0].command.write(OCW3_READ_ISR);
            self.pics[1].command.write(OCW3_READ_ISR);
            let master = self.pics[0].command.read() as u16;
            let slave = self.pics[1].command.read() as u16;
            (slave << 8) | master
        }
    }

    /// Check whether `irq` (0..16) is currently marked in-service.
    pub fn irq_in_service(&mut self, irq: u8) -> bool {
        self.read_isr() & (1 << irq) != 0
    }

    fn handles_interrupt(&self, vector: u8) -> bool {
        self.pics.iter().any(|p| p.handles_interrupt(vector))
    }

    /// Unmask a single IRQ line (0..16).
    ///
    /// # Safety
    ///
    /// A handler for the corresponding vector must already be installed.
    pub unsafe fn unmask_irq(&mut self, irq: u8) {
        // SAFETY: read-modify-write of the interrupt mask register.
        unsafe {
            if irq < 8 {
                let mut port: Port<u8> = Port::new(PIC1_DATA);
                let value = port.read();
                port.write(value & !(1 << irq));
            } else {
                let mut port: Port<u8> = Port::new(PIC2_DATA);
                let value = port.read();
                port.write(value & !(1 << (irq - 8)));
            }
        }
    }
}

struct Pic {
    offset: u8,
    command: Port<u8>,
    data: Port<u8>,
}

impl Pic {
    const fn handles_interrupt(&self, vector: u8) -> bool {
        self.offset <= vector && vector < self.offset + 8
    }

    unsafe fn end_of_interrupt(&mut self) {
        // SAFETY: caller is servicing an interrupt owned by this PIC.
        unsafe {
            self.command.write(PIC_EOI);
        }
    }
}

/// Global PIC pair, remapped to vectors 32..48.
pub static PICS: Mutex<ChainedPics> = Mutex::new(ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET));
