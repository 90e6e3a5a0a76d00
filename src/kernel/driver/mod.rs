// src/kernel/driver/mod.rs
//! Device drivers.

pub mod console;
pub mod keyboard;
pub mod pit;
pub mod serial;
pub mod vga;

pub use console::{write_console, write_debug};
pub use keyboard::Ps2Keyboard;
pub use pit::ProgrammableIntervalTimer;
pub use serial::SerialPort;
pub use vga::VgaWriter;
