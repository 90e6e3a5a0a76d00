// src/kernel/driver/keyboard.rs
//! PS/2 keyboard driver.
//!
//! The IRQ 1 handler reads raw scancodes from the controller and feeds them
//! through a scancode-set-1 decoder; decoded ASCII bytes land in a fixed
//! ring buffer that `read(0)` drains without blocking.

use lazy_static::lazy_static;
use pc_keyboard::{DecodedKey, HandleControl, Keyboard, ScancodeSet1, layouts};
use spin::Mutex;

use crate::arch::x86_64::cpu::critical_section;
use crate::arch::x86_64::port::PortReadOnly;
use crate::kernel::core::{Device, KernelResult};

const DATA_PORT: u16 = 0x60;
const STATUS_PORT: u16 = 0x64;

/// Output-buffer-full bit in the controller status register.
const STATUS_OUTPUT_FULL: u8 = 0x01;

/// Capacity of the decoded-byte ring; excess input is dropped.
const INPUT_CAPACITY: usize = 256;

/// The PS/2 controller's keyboard side.
pub struct Ps2Keyboard {
    data: PortReadOnly<u8>,
    status: PortReadOnly<u8>,
}

impl Ps2Keyboard {
    pub const fn new() -> Self {
        Self {
            data: PortReadOnly::new(DATA_PORT),
            status: PortReadOnly::new(STATUS_PORT),
        }
    }

    /// Read a pending scancode, if any.
    pub fn read_scancode(&mut self) -> Option<u8> {
        // SAFETY: standard PS/2 controller status/data protocol.
        unsafe {
            if self.status.read() & STATUS_OUTPUT_FULL != 0 {
                Some(self.data.read())
            } else {
                None
            }
        }
    }
}

impl Device for Ps2Keyboard {
    fn name(&self) -> &'static str {
        "PS/2 keyboard"
    }

    fn init(&mut self) -> KernelResult<()> {
        // Drain anything left in the controller from before boot.
        while self.read_scancode().is_some() {}
        Ok(())
    }
}

/// Global keyboard controller handle.
pub static KEYBOARD: Mutex<Ps2Keyboard> = Mutex::new(Ps2Keyboard::new());

lazy_static! {
    static ref DECODER: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
        Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
    );
}

struct ByteQueue {
    buf: [u8; INPUT_CAPACITY],
    head: usize,
    len: usize,
}

impl ByteQueue {
    const fn new() -> Self {
        Self {
            buf: [0; INPUT_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.len == INPUT_CAPACITY {
            return; // full: drop newest
        }
        self.buf[(self.head + self.len) % INPUT_CAPACITY] = byte;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % INPUT_CAPACITY;
        self.len -= 1;
        Some(byte)
    }
}

static INPUT: Mutex<ByteQueue> = Mutex::new(ByteQueue::new());

/// Decode one raw scancode and queue any resulting byte.
///
/// Called from the keyboard interrupt handler.
pub fn handle_scancode(scancode: u8) {
    let mut decoder = DECODER.lock();
    if let Ok(Some(event)) = decoder.add_byte(scancode) {
        if let Some(DecodedKey::Unicode(c)) = decoder.process_keyevent(event) {
            if c.is_ascii() {
                push_byte(c as u8);
            }
        }
    }
}

/// Queue one byte of input directly (also used by test harnesses).
///
/// The queue is shared with the keyboard interrupt handler, so every access
/// masks interrupts.
pub fn push_byte(byte: u8) {
    critical_section(|| INPUT.lock().push(byte));
}

/// Whether at least one decoded byte is waiting.
pub fn has_key() -> bool {
    critical_section(|| INPUT.lock().len > 0)
}

/// Pop one decoded byte; 0 means the buffer is empty.
pub fn get_char() -> u8 {
    critical_section(|| INPUT.lock().pop().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::ByteQueue;

    #[test]
    fn byte_queue_is_fifo() {
        let mut q = ByteQueue::new();
        q.push(b'a');
        q.push(b'b');
        q.push(b'c');
        assert_eq!(q.pop(), Some(b'a'));
        assert_eq!(q.pop(), Some(b'b'));
        assert_eq!(q.pop(), Some(b'c'));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn byte_queue_drops_when_full() {
        let mut q = ByteQueue::new();
        for i in 0..super::INPUT_CAPACITY + 10 {
            q.push((i % 251) as u8);
        }
        let mut count = 0;
        while q.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, super::INPUT_CAPACITY);
    }
}
