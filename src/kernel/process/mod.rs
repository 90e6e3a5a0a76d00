// src/kernel/process/mod.rs
//! Process control blocks and the process table.
//!
//! PCB storage is a fixed arena indexed by slot; the scheduler's queues hold
//! PIDs and the intrusive `next_ready` link inside each PCB, so scheduling
//! never allocates. Slot 0 belongs to the idle process for the lifetime of
//! the kernel.

pub mod context;
pub mod factory;

pub use context::{switch_ctx, switch_to, Context, ContextFrame};
pub use factory::create_user;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use bitflags::bitflags;
use spin::Mutex;
use x86_64::VirtAddr;

use crate::kernel::core::{KernelResult, MemoryError, Pid, ProcessError, Tick};
use crate::kernel::mm::AddressSpace;

/// Process table capacity, idle included.
pub const MAX_PROCESSES: usize = 32;

/// Name storage: 31 bytes plus terminator-equivalent headroom.
pub const NAME_CAPACITY: usize = 32;

/// Per-process kernel stack size.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

bitflags! {
    /// Per-process flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcessFlags: u8 {
        /// Ring 3 process with its own address space and user stack.
        const USER = 1 << 0;
    }
}

/// Process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Created, not yet enqueued.
    New,
    /// Waiting in the ready queue.
    Ready,
    /// Executing on the CPU (exactly one at any time).
    Running,
    /// Off the queue: sleeping or waiting.
    Blocked,
    /// Finished; resources reclaimed by the next table sweep.
    Terminated,
}

/// Fixed-capacity process name.
#[derive(Debug, Clone, Copy)]
pub struct ProcessName {
    bytes: [u8; NAME_CAPACITY],
    len: u8,
}

impl ProcessName {
    /// Build from a string, truncating to 31 bytes.
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; NAME_CAPACITY];
        let len = name.len().min(NAME_CAPACITY - 1);
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Construction only copies from a &str prefix, so this stays UTF-8
        // as long as the truncation landed on a character boundary; fall
        // back to the valid prefix if it didn't.
        match core::str::from_utf8(&self.bytes[..self.len as usize]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

/// An owned, heap-backed kernel stack.
pub struct OwnedStack {
    base: NonNull<u8>,
    layout: Layout,
}

impl OwnedStack {
    /// Allocate a zeroed stack of `size` bytes, 16-byte aligned.
    pub fn new(size: usize) -> KernelResult<Self> {
        let layout = Layout::from_size_align(size, 16)
            .map_err(|_| MemoryError::InvalidAddress)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(MemoryError::OutOfMemory)?;
        Ok(Self { base, layout })
    }

    /// Top of the stack (stacks grow downward); 16-byte aligned.
    #[must_use]
    pub fn top(&self) -> VirtAddr {
        VirtAddr::new(self.base.as_ptr() as u64 + self.layout.size() as u64)
    }
}

impl Drop for OwnedStack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the stored layout.
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

// SAFETY: the stack region is exclusively owned; the pointer never aliases.
unsafe impl Send for OwnedStack {}

/// Process control block.
pub struct Pcb {
    pub(crate) pid: Pid,
    pub(crate) name: ProcessName,
    pub(crate) state: ProcessState,
    pub(crate) flags: ProcessFlags,

    /// Owned kernel stack; `None` only for idle, which runs on the boot
    /// stack.
    pub(crate) kernel_stack: Option<OwnedStack>,
    /// Top of the kernel stack, cached for the TSS/fast-syscall update on
    /// switch.
    pub(crate) kstack_top: VirtAddr,
    /// Saved kernel stack pointer; valid only while READY or BLOCKED.
    pub(crate) context: Context,

    /// `None` means the kernel address space (kernel threads, idle).
    pub(crate) address_space: Option<AddressSpace>,
    pub(crate) user_stack_base: VirtAddr,
    pub(crate) user_stack_top: VirtAddr,
    pub(crate) user_entry: VirtAddr,
    pub(crate) user_image_size: usize,
    /// Entry function for kernel threads.
    pub(crate) kernel_entry: Option<fn()>,

    pub(crate) time_slice_remaining: u32,
    /// Target tick for a sleeping process; 0 means not sleeping.
    pub(crate) wake_tick: Tick,
    pub(crate) cpu_ticks: u64,

    pub(crate) parent_pid: Pid,
    pub(crate) exit_code: i32,

    /// Intrusive ready-queue link.
    pub(crate) next_ready: Option<Pid>,
}

impl Pcb {
    fn new(pid: Pid, name: &str, flags: ProcessFlags) -> Self {
        Self {
            pid,
            name: ProcessName::new(name),
            state: ProcessState::New,
            flags,
            kernel_stack: None,
            kstack_top: VirtAddr::zero(),
            context: Context::empty(),
            address_space: None,
            user_stack_base: VirtAddr::zero(),
            user_stack_top: VirtAddr::zero(),
            user_entry: VirtAddr::zero(),
            user_image_size: 0,
            kernel_entry: None,
            time_slice_remaining: 0,
            wake_tick: 0,
            cpu_ticks: 0,
            parent_pid: Pid::IDLE,
            exit_code: 0,
            next_ready: None,
        }
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.flags.contains(ProcessFlags::USER)
    }

    #[must_use]
    pub fn cpu_ticks(&self) -> u64 {
        self.cpu_ticks
    }

    #[must_use]
    pub fn wake_tick(&self) -> Tick {
        self.wake_tick
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    #[must_use]
    pub fn parent_pid(&self) -> Pid {
        self.parent_pid
    }

    #[must_use]
    pub fn user_image_size(&self) -> usize {
        self.user_image_size
    }

    /// Bounds of the user stack region, `(base, top)`.
    #[must_use]
    pub fn user_stack_bounds(&self) -> (VirtAddr, VirtAddr) {
        (self.user_stack_base, self.user_stack_top)
    }

    /// Set the entry function for a kernel thread. Only meaningful on a NEW
    /// PCB, before its context is seeded.
    pub fn set_kernel_entry(&mut self, entry: fn()) {
        debug_assert_eq!(self.state, ProcessState::New);
        self.kernel_entry = Some(entry);
    }
}

/// Fixed-capacity PID → PCB arena.
pub struct ProcessTable {
    slots: [Option<Pcb>; MAX_PROCESSES],
    next_pid: u64,
}

impl ProcessTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PROCESSES],
            next_pid: 1,
        }
    }

    /// Install the idle PCB into slot 0. Called once by the scheduler.
    pub(crate) fn install_idle(&mut self) -> &mut Pcb {
        assert!(self.slots[0].is_none(), "idle already installed");
        let mut idle = Pcb::new(Pid::IDLE, "idle", ProcessFlags::empty());
        idle.state = ProcessState::Running;
        idle.time_slice_remaining = 0;
        self.slots[0] = Some(idle);
        self.slots[0].as_mut().unwrap()
    }

    /// Allocate a PCB in a free slot with a fresh PID and an owned kernel
    /// stack.
    ///
    /// PIDs are never reused within a boot; the counter only grows.
    pub fn allocate(&mut self, name: &str, flags: ProcessFlags) -> KernelResult<&mut Pcb> {
        let slot = self.slots[1..]
            .iter()
            .position(Option::is_none)
            .map(|i| i + 1)
            .ok_or(ProcessError::NoSlot)?;

        let pid = Pid::new(self.next_pid);
        self.next_pid += 1;

        let stack = OwnedStack::new(KERNEL_STACK_SIZE)?;
        let mut pcb = Pcb::new(pid, name, flags);
        pcb.kstack_top = stack.top();
        pcb.kernel_stack = Some(stack);

        self.slots[slot] = Some(pcb);
        Ok(self.slots[slot].as_mut().unwrap())
    }

    /// Look up a PCB by PID.
    #[must_use]
    pub fn lookup(&self, pid: Pid) -> Option<&Pcb> {
        self.slots
            .iter()
            .flatten()
            .find(|pcb| pcb.pid == pid)
    }

    /// Look up a PCB by PID, mutably.
    pub fn lookup_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|pcb| pcb.pid == pid)
    }

    /// Free the slot holding `pid`, dropping the kernel stack, any user
    /// stacks (via the address space) and the address space itself.
    ///
    /// Releasing the RUNNING process or idle is a kernel bug.
    pub fn release(&mut self, pid: Pid) -> KernelResult<()> {
        assert!(!pid.is_idle(), "releasing the idle process");
        let slot = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.pid == pid))
            .ok_or(ProcessError::NotFound)?;

        let pcb = self.slots[slot].as_ref().unwrap();
        assert!(
            pcb.state != ProcessState::Running,
            "releasing the running process (pid {})",
            pid
        );

        // Dropping the PCB drops OwnedStack and AddressSpace, which return
        // every owned frame.
        self.slots[slot] = None;
        Ok(())
    }

    /// Iterate over live PCBs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().flatten()
    }

    /// Iterate mutably over live PCBs in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pcb> {
        self.slots.iter_mut().flatten()
    }

    /// Number of live PCBs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global process table. Lock order: scheduler first, then the table; both
/// only with interrupts masked (see `kernel::sched::with_kernel`).
pub static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_are_unique_and_monotonic() {
        let mut table = ProcessTable::new();
        let a = table.allocate("a", ProcessFlags::empty()).unwrap().pid();
        let b = table.allocate("b", ProcessFlags::empty()).unwrap().pid();
        let c = table.allocate("c", ProcessFlags::empty()).unwrap().pid();
        assert!(a.as_u64() < b.as_u64() && b.as_u64() < c.as_u64());

        // Releasing does not recycle PIDs.
        table.release(b).unwrap();
        let d = table.allocate("d", ProcessFlags::empty()).unwrap().pid();
        assert!(d.as_u64() > c.as_u64());
    }

    #[test]
    fn allocate_fails_when_full() {
        let mut table = ProcessTable::new();
        table.install_idle();
        for i in 0..MAX_PROCESSES - 1 {
            assert!(table.allocate("p", ProcessFlags::empty()).is_ok(), "slot {i}");
        }
        assert!(table.allocate("overflow", ProcessFlags::empty()).is_err());
    }

    #[test]
    fn released_slots_are_reusable() {
        let mut table = ProcessTable::new();
        table.install_idle();
        let mut last = Pid::IDLE;
        for _ in 0..MAX_PROCESSES - 1 {
            last = table.allocate("p", ProcessFlags::empty()).unwrap().pid();
        }
        table.release(last).unwrap();
        assert!(table.allocate("again", ProcessFlags::empty()).is_ok());
    }

    #[test]
    fn idle_occupies_slot_zero() {
        let mut table = ProcessTable::new();
        let idle = table.install_idle();
        assert_eq!(idle.pid(), Pid::IDLE);
        assert_eq!(idle.state(), ProcessState::Running);
        assert_eq!(table.lookup(Pid::IDLE).unwrap().name(), "idle");
    }

    #[test]
    fn names_truncate_to_31_bytes() {
        let long = "a-process-name-well-beyond-the-thirty-one-byte-limit";
        let name = ProcessName::new(long);
        assert_eq!(name.as_str().len(), NAME_CAPACITY - 1);
        assert!(long.starts_with(name.as_str()));
    }

    #[test]
    fn lookup_by_pid() {
        let mut table = ProcessTable::new();
        let pid = table.allocate("target", ProcessFlags::USER).unwrap().pid();
        assert_eq!(table.lookup(pid).unwrap().name(), "target");
        assert!(table.lookup(Pid::new(9999)).is_none());
        assert!(table.lookup_mut(pid).unwrap().is_user());
    }
}
