//! Process-level wrappers.

use crate::syscall;

/// Terminate the calling process.
pub fn exit(code: i32) -> ! {
    syscall::exit(code)
}

/// PID of the calling process.
pub fn getpid() -> u64 {
    let pid = syscall::getpid();
    debug_assert!(pid >= 0);
    pid as u64
}

/// Yield the CPU.
pub fn yield_now() {
    let _ = syscall::yield_now();
}

/// Sleep for at least `ms` milliseconds (10 ms granularity).
pub fn sleep_ms(ms: u64) {
    let _ = syscall::sleep(ms);
}
