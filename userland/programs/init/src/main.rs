//! init: first user process. Prints a banner, then heartbeats.

#![no_std]
#![no_main]

use libchanux::io::{format_u64, print_str, println_str};
use libchanux::process::{getpid, sleep_ms};

#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.entry")]
pub extern "C" fn _start() -> ! {
    let mut digits = [0u8; 20];
    print_str("init: running as pid ");
    print_str(format_u64(getpid(), &mut digits));
    print_str("\n");

    loop {
        sleep_ms(1000);
        println_str("init: alive");
    }
}
