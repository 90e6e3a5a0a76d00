//! shell: a minimal interactive shell over `read(0)` / `write(1)`.
//!
//! Input is non-blocking; the main loop sleeps between polls instead of
//! spinning. Builtins: help, pid, echo, sleep, exit.

#![no_std]
#![no_main]

use libchanux::io::{format_u64, print_str, println_str, read_available};
use libchanux::process::{exit, getpid, sleep_ms};

const LINE_CAPACITY: usize = 128;
const POLL_INTERVAL_MS: u64 = 20;

#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.entry")]
pub extern "C" fn _start() -> ! {
    println_str("chanux shell; try 'help'");
    prompt();

    let mut line = [0u8; LINE_CAPACITY];
    let mut len = 0usize;
    let mut chunk = [0u8; 32];

    loop {
        let n = read_available(&mut chunk);
        if n == 0 {
            sleep_ms(POLL_INTERVAL_MS);
            continue;
        }

        for &byte in &chunk[..n] {
            match byte {
                b'\r' | b'\n' => {
                    print_str("\n");
                    run_line(&line[..len]);
                    len = 0;
                    prompt();
                }
                0x08 | 0x7f => {
                    if len > 0 {
                        len -= 1;
                        print_str("\x08 \x08");
                    }
                }
                byte if byte.is_ascii_graphic() || byte == b' ' => {
                    if len < LINE_CAPACITY {
                        line[len] = byte;
                        len += 1;
                        // Echo as we go.
                        let echo = [byte];
                        if let Ok(s) = core::str::from_utf8(&echo) {
                            print_str(s);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn prompt() {
    print_str("$ ");
}

fn run_line(line: &[u8]) {
    let Ok(line) = core::str::from_utf8(line) else {
        println_str("shell: not utf-8");
        return;
    };
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let (cmd, rest) = match line.split_once(' ') {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    match cmd {
        "help" => {
            println_str("builtins: help pid echo <text> sleep <ms> exit [code]");
        }
        "pid" => {
            let mut digits = [0u8; 20];
            println_str(format_u64(getpid(), &mut digits));
        }
        "echo" => {
            println_str(rest);
        }
        "sleep" => match parse_u64(rest) {
            Some(ms) => sleep_ms(ms),
            None => println_str("usage: sleep <ms>"),
        },
        "exit" => {
            let code = parse_u64(rest).unwrap_or(0) as i32;
            println_str("bye");
            exit(code);
        }
        _ => {
            print_str("shell: unknown command: ");
            println_str(cmd);
        }
    }
}

fn parse_u64(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for byte in s.bytes() {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((byte - b'0') as u64)?;
    }
    Some(value)
}
