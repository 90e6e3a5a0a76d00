// src/kernel/syscall/mod.rs
//! Syscall dispatcher and handlers.
//!
//! Wire contract (stable):
//!
//! | # | name | signature |
//! |---|---|---|
//! | 0 | exit | `(code: i32) -> never` |
//! | 1 | write | `(fd: i32, buf: *const u8, len: usize) -> isize` |
//! | 2 | read | `(fd: i32, buf: *mut u8, len: usize) -> isize` |
//! | 3 | yield | `() -> i32` |
//! | 4 | getpid | `() -> pid` |
//! | 5 | sleep | `(ms: u64) -> i32` |
//!
//! Errors cross the boundary as negated POSIX codes; kernel-internal
//! `KernelError` values never leak here. An unknown syscall number is not a
//! crime: the process gets `-ENOSYS` and keeps running.

use crate::kernel::driver::{console, keyboard};
use crate::kernel::mm::USER_SPACE_END;
use crate::kernel::sched;

/// Syscall return type: negative values are errors, everything else is
/// success.
pub type SyscallResult = i64;

// Error codes at the ABI boundary (negated POSIX values).
pub const EINTR: SyscallResult = -4; // Interrupted system call
pub const EBADF: SyscallResult = -9; // Bad file descriptor
pub const ENOMEM: SyscallResult = -12; // Out of memory
pub const EFAULT: SyscallResult = -14; // Bad address
pub const EINVAL: SyscallResult = -22; // Invalid argument
pub const ENOSYS: SyscallResult = -38; // Function not implemented

// Syscall numbers (stable wire values).
pub const SYS_EXIT: u64 = 0;
pub const SYS_WRITE: u64 = 1;
pub const SYS_READ: u64 = 2;
pub const SYS_YIELD: u64 = 3;
pub const SYS_GETPID: u64 = 4;
pub const SYS_SLEEP: u64 = 5;

/// File descriptors with passthrough semantics.
const FD_STDIN: i32 = 0;
const FD_STDOUT: i32 = 1;
const FD_STDERR: i32 = 2;

type SyscallHandler = fn(u64, u64, u64, u64, u64, u64) -> SyscallResult;

/// Dispatch table; `None` slots and out-of-range numbers both yield
/// `-ENOSYS`.
static SYSCALL_TABLE: [Option<SyscallHandler>; 8] = [
    Some(sys_exit),   // 0
    Some(sys_write),  // 1
    Some(sys_read),   // 2
    Some(sys_yield),  // 3
    Some(sys_getpid), // 4
    Some(sys_sleep),  // 5
    None,
    None,
];

/// Dispatch a syscall to its handler; the return value travels back to user
/// mode unchanged.
pub fn dispatch(num: u64, a1: u64, a2: u64, a3: u64, a4: u64, a5: u64, a6: u64) -> SyscallResult {
    let Some(Some(handler)) = SYSCALL_TABLE.get(num as usize) else {
        return ENOSYS;
    };

    #[cfg(feature = "syscall_trace")]
    crate::debug_println!(
        "[SYSCALL] pid {} num {} args ({:#x}, {:#x}, {:#x})",
        sched::current_pid(),
        num,
        a1,
        a2,
        a3
    );

    handler(a1, a2, a3, a4, a5, a6)
}

/// Validate a user buffer `[addr, addr + len)` arithmetically: non-null, no
/// wraparound, entirely below [`USER_SPACE_END`].
///
/// Mapping and USER-bit checks are a separate step
/// ([`user_range_accessible`]) because they need the current address space.
pub fn validate_user_range(addr: u64, len: u64) -> Result<(), SyscallResult> {
    if addr == 0 || addr >= USER_SPACE_END {
        return Err(EFAULT);
    }
    let end = addr.checked_add(len).ok_or(EFAULT)?;
    if end > USER_SPACE_END {
        return Err(EFAULT);
    }
    Ok(())
}

/// Verify every page of `[addr, addr + len)` is mapped user-accessible in
/// the current process's address space.
///
/// Kernel threads have no private address space; their buffers are kernel
/// memory and pass by definition.
fn user_range_accessible(addr: u64, len: u64) -> bool {
    use crate::kernel::mm::PAGE_SIZE;
    use x86_64::VirtAddr;

    sched::with_kernel(|sched, table| {
        let Some(pcb) = table.lookup(sched.current()) else {
            return true;
        };
        let Some(space) = pcb.address_space.as_ref() else {
            return true;
        };

        let start = addr & !(PAGE_SIZE as u64 - 1);
        let end = addr + len.max(1);
        let mut page = start;
        while page < end {
            if !space.user_accessible(VirtAddr::new(page)) {
                return false;
            }
            page += PAGE_SIZE as u64;
        }
        true
    })
}

fn check_user_buffer(addr: u64, len: u64) -> Result<(), SyscallResult> {
    validate_user_range(addr, len)?;
    if !user_range_accessible(addr, len) {
        return Err(EFAULT);
    }
    Ok(())
}

/// exit(code): terminate the current process. Does not return.
fn sys_exit(code: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> SyscallResult {
    sched::exit(code as i32)
}

/// write(fd, buf, len): stdout/stderr go to the console byte-for-byte.
///
/// Errors: `EBADF` for any other descriptor (stdin included), `EFAULT` for
/// a bad buffer; nothing is emitted on an error path.
fn sys_write(fd: u64, buf: u64, len: u64, _a4: u64, _a5: u64, _a6: u64) -> SyscallResult {
    match fd as i32 {
        FD_STDOUT | FD_STDERR => {}
        _ => return EBADF,
    }

    // Pointer validation is unconditional; a zero-length write through a
    // null or kernel-half pointer is still a fault.
    if let Err(e) = check_user_buffer(buf, len) {
        return e;
    }
    if len == 0 {
        return 0;
    }

    // SAFETY: the range was validated against the user half and its
    // mappings; single CPU, so the mapping cannot change mid-copy.
    let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, len as usize) };
    for &byte in bytes {
        console::put_byte(byte);
    }

    len as SyscallResult
}

/// read(fd, buf, len): stdin drains the keyboard buffer without blocking
/// and may return 0.
///
/// Errors: `EBADF` for any descriptor but stdin, `EFAULT` for a bad buffer.
fn sys_read(fd: u64, buf: u64, len: u64, _a4: u64, _a5: u64, _a6: u64) -> SyscallResult {
    if fd as i32 != FD_STDIN {
        return EBADF;
    }

    // Same rule as sys_write: validate before the length fast path.
    if let Err(e) = check_user_buffer(buf, len) {
        return e;
    }
    if len == 0 {
        return 0;
    }

    // SAFETY: as in sys_write, plus exclusive access: the buffer belongs to
    // the calling process and nothing else writes it.
    let bytes = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, len as usize) };
    let mut count = 0usize;
    while count < bytes.len() {
        let c = keyboard::get_char();
        if c == 0 {
            break;
        }
        bytes[count] = c;
        count += 1;
    }

    count as SyscallResult
}

/// yield(): voluntarily give up the CPU. Always succeeds.
fn sys_yield(_a1: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> SyscallResult {
    sched::yield_now();
    0
}

/// getpid(): PID of the calling process.
fn sys_getpid(_a1: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> SyscallResult {
    sched::current_pid().as_u64() as SyscallResult
}

/// sleep(ms): block until the global tick reaches `now + ceil(ms / 10)`;
/// `ms == 0` is a plain yield.
fn sys_sleep(ms: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> SyscallResult {
    sched::sleep_ms(ms);
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_numbers_return_enosys() {
        // Empty table slots.
        assert_eq!(dispatch(6, 0, 0, 0, 0, 0, 0), ENOSYS);
        assert_eq!(dispatch(7, 0, 0, 0, 0, 0, 0), ENOSYS);
        // Beyond the table.
        assert_eq!(dispatch(8, 0, 0, 0, 0, 0, 0), ENOSYS);
        assert_eq!(dispatch(1000, 0, 0, 0, 0, 0, 0), ENOSYS);
        assert_eq!(dispatch(u64::MAX, 0, 0, 0, 0, 0, 0), ENOSYS);
    }

    #[test]
    fn pointer_validation_rejects_null() {
        assert_eq!(validate_user_range(0, 1), Err(EFAULT));
    }

    #[test]
    fn pointer_validation_rejects_kernel_half() {
        assert_eq!(validate_user_range(USER_SPACE_END, 1), Err(EFAULT));
        assert_eq!(
            validate_user_range(0xFFFF_8000_0000_0000, 8),
            Err(EFAULT)
        );
    }

    #[test]
    fn pointer_validation_rejects_wraparound() {
        assert_eq!(validate_user_range(u64::MAX - 4, 16), Err(EFAULT));
    }

    #[test]
    fn pointer_validation_rejects_ranges_crossing_the_boundary() {
        assert_eq!(validate_user_range(USER_SPACE_END - 8, 16), Err(EFAULT));
    }

    #[test]
    fn pointer_validation_accepts_user_ranges() {
        assert!(validate_user_range(0x40_0000, 4096).is_ok());
        assert!(validate_user_range(USER_SPACE_END - 16, 16).is_ok());
    }

    #[test]
    fn write_rejects_bad_descriptors_and_buffers() {
        // Bad fd beats buffer inspection; nothing is emitted either way.
        assert_eq!(sys_write(0, 0x40_0000, 1, 0, 0, 0), EBADF);
        assert_eq!(sys_write(5, 0x40_0000, 1, 0, 0, 0), EBADF);
        // Kernel-half buffer on a valid fd.
        assert_eq!(
            sys_write(1, 0xFFFF_FFFF_FFFF_0000, 1, 0, 0, 0),
            EFAULT
        );
        // A zero length does not launder a bad pointer.
        assert_eq!(sys_write(1, 0, 0, 0, 0, 0), EFAULT);
        assert_eq!(
            sys_write(1, 0xFFFF_FFFF_FFFF_0000, 0, 0, 0, 0),
            EFAULT
        );
    }

    #[test]
    fn read_rejects_bad_descriptors_and_buffers() {
        assert_eq!(sys_read(1, 0x40_0000, 1, 0, 0, 0), EBADF);
        assert_eq!(sys_read(2, 0x40_0000, 1, 0, 0, 0), EBADF);
        assert_eq!(sys_read(0, 0, 1, 0, 0, 0), EFAULT);
        assert_eq!(sys_read(0, 0, 0, 0, 0, 0), EFAULT);
        assert_eq!(sys_read(0, USER_SPACE_END, 0, 0, 0, 0), EFAULT);
    }
}
