// src/kernel/sched/mod.rs
//! Round-robin scheduler with a sleep queue and timer-driven preemption.
//!
//! The module is split in two layers:
//!
//! * [`Scheduler`] is a plain state machine over a [`ProcessTable`]. It
//!   decides; it never touches hardware. Every method that can reschedule
//!   returns the `(prev, next)` pair instead of switching, which is what
//!   makes fairness and sleep behavior testable with simulated ticks on a
//!   host.
//! * The free functions at the bottom are the kernel shell: they take the
//!   global locks with interrupts masked, apply the decision with the real
//!   context-switch stub, and keep the TSS / fast-syscall stack and CR3 in
//!   step.
//!
//! Lock order is fixed: scheduler, then process table, always with
//! interrupts masked. Decisions are applied only after both locks are
//! dropped.

use spin::Mutex;
use x86_64::structures::paging::PhysFrame;

use crate::kernel::core::{KernelResult, Pid, Tick};
use crate::kernel::driver::pit::MS_PER_TICK;
use crate::kernel::process::{
    context, Pcb, ProcessFlags, ProcessState, ProcessTable, MAX_PROCESSES, PROCESS_TABLE,
};

/// Ticks per time slice: 50 ms at 100 Hz.
pub const TIME_SLICE_TICKS: u32 = 5;

/// Counters kept by the scheduler; queried by tests and the shell's `stats`
/// builtin.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub context_switches: u64,
    pub preemptions: u64,
    pub yields: u64,
    pub processes_created: u64,
    pub processes_terminated: u64,
}

/// FIFO of READY processes, linked through the PCBs' `next_ready` field so
/// queue operations never allocate. The running process is never in it;
/// neither is idle.
pub struct ReadyQueue {
    head: Option<Pid>,
    tail: Option<Pid>,
    len: usize,
}

impl ReadyQueue {
    const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push_back(&mut self, table: &mut ProcessTable, pid: Pid) {
        let pcb = table.lookup_mut(pid).expect("enqueue of unknown pid");
        debug_assert_eq!(pcb.state, ProcessState::Ready);
        pcb.next_ready = None;

        match self.tail {
            Some(tail) => {
                table
                    .lookup_mut(tail)
                    .expect("queue tail vanished")
                    .next_ready = Some(pid);
            }
            None => self.head = Some(pid),
        }
        self.tail = Some(pid);
        self.len += 1;
    }

    fn pop_front(&mut self, table: &mut ProcessTable) -> Option<Pid> {
        let pid = self.head?;
        let pcb = table.lookup_mut(pid).expect("queue head vanished");
        self.head = pcb.next_ready.take();
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(pid)
    }
}

/// The scheduling state machine.
pub struct Scheduler {
    current: Pid,
    ready: ReadyQueue,
    ticks: Tick,
    online: bool,
    stats: SchedulerStats,
}

impl Scheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: Pid::IDLE,
            ready: ReadyQueue::new(),
            ticks: 0,
            online: false,
            stats: SchedulerStats {
                context_switches: 0,
                preemptions: 0,
                yields: 0,
                processes_created: 0,
                processes_terminated: 0,
            },
        }
    }

    /// Install the idle process (PID 0, RUNNING, the boot stack and kernel
    /// address space) and start accepting timer ticks.
    pub fn init(&mut self, table: &mut ProcessTable) {
        table.install_idle();
        self.current = Pid::IDLE;
        self.online = true;
    }

    #[must_use]
    pub fn current(&self) -> Pid {
        self.current
    }

    #[must_use]
    pub fn ticks(&self) -> Tick {
        self.ticks
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online
    }

    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Move a NEW process into the ready queue.
    pub fn make_ready(&mut self, table: &mut ProcessTable, pid: Pid) {
        {
            let pcb = table.lookup_mut(pid).expect("make_ready of unknown pid");
            assert_eq!(pcb.state, ProcessState::New, "make_ready on a live process");
            pcb.state = ProcessState::Ready;
        }
        self.enqueue_ready(table, pid);
        self.stats.processes_created += 1;
    }

    /// Append a READY process to the queue tail.
    ///
    /// The running process and idle are never enqueued; violating either is
    /// a kernel bug.
    pub fn enqueue_ready(&mut self, table: &mut ProcessTable, pid: Pid) {
        assert!(pid != self.current, "enqueueing the running process");
        assert!(!pid.is_idle(), "enqueueing the idle process");
        self.ready.push_back(table, pid);
    }

    /// Remove and return the queue head; idle when the queue is empty.
    pub fn pick_next(&mut self, table: &mut ProcessTable) -> Pid {
        self.ready.pop_front(table).unwrap_or(Pid::IDLE)
    }

    fn set_running(&mut self, table: &mut ProcessTable, pid: Pid) {
        let pcb = table.lookup_mut(pid).expect("schedule target vanished");
        assert!(
            pcb.state != ProcessState::Terminated,
            "switching to a TERMINATED process (pid {})",
            pid
        );
        pcb.state = ProcessState::Running;
        pcb.time_slice_remaining = TIME_SLICE_TICKS;
        self.current = pid;
        self.stats.context_switches += 1;
    }

    /// Voluntary yield. Returns the switch pair, or `None` when the caller
    /// keeps the CPU.
    pub fn yield_current(&mut self, table: &mut ProcessTable) -> Option<(Pid, Pid)> {
        let prev = self.current;
        self.stats.yields += 1;

        if prev.is_idle() {
            // Idle has nothing to rotate; hand over only if work exists.
            let next = self.ready.pop_front(table)?;
            table.lookup_mut(prev).expect("idle vanished").state = ProcessState::Ready;
            self.set_running(table, next);
            return Some((prev, next));
        }

        {
            let pcb = table.lookup_mut(prev).expect("yield without current");
            debug_assert_eq!(pcb.state, ProcessState::Running);
            pcb.state = ProcessState::Ready;
        }
        self.ready.push_back(table, prev);

        let next = self.pick_next(table);
        if next == prev {
            // Alone in the system; keep the slice and carry on.
            table.lookup_mut(prev).expect("yield without current").state =
                ProcessState::Running;
            return None;
        }

        self.set_running(table, next);
        Some((prev, next))
    }

    /// Block the running process. The caller does any sleep/wait
    /// bookkeeping first; this only changes state and picks a successor.
    pub fn block_current(&mut self, table: &mut ProcessTable) -> (Pid, Pid) {
        let prev = self.current;
        assert!(!prev.is_idle(), "blocking the idle process");

        let pcb = table.lookup_mut(prev).expect("block without current");
        debug_assert_eq!(pcb.state, ProcessState::Running);
        pcb.state = ProcessState::Blocked;

        let next = self.pick_next(table);
        if next.is_idle() {
            table.lookup_mut(Pid::IDLE).expect("idle vanished").state =
                ProcessState::Running;
            self.current = Pid::IDLE;
            self.stats.context_switches += 1;
        } else {
            self.set_running(table, next);
        }
        (prev, next)
    }

    /// Move a BLOCKED process back to READY. Does not switch.
    pub fn unblock(&mut self, table: &mut ProcessTable, pid: Pid) {
        {
            let pcb = table.lookup_mut(pid).expect("unblock of unknown pid");
            assert_eq!(
                pcb.state,
                ProcessState::Blocked,
                "unblock of a process that is not BLOCKED (pid {})",
                pid
            );
            pcb.state = ProcessState::Ready;
        }
        self.enqueue_ready(table, pid);
    }

    /// Put the running process to sleep for `ms` milliseconds.
    ///
    /// `ms == 0` degenerates to a yield. Otherwise the wake tick is
    /// `now + ceil(ms / MS_PER_TICK)` and the process blocks.
    pub fn sleep_current(&mut self, table: &mut ProcessTable, ms: u64) -> Option<(Pid, Pid)> {
        if ms == 0 {
            return self.yield_current(table);
        }

        let wake = self.ticks + ms.div_ceil(MS_PER_TICK);
        table
            .lookup_mut(self.current)
            .expect("sleep without current")
            .wake_tick = wake;
        Some(self.block_current(table))
    }

    /// Timer tick: advance time, reap zombies, wake sleepers, account the
    /// running process, and preempt if its slice is up (or it is idle with
    /// work pending).
    ///
    /// Wake-before-preempt order is fixed so a process waking on this tick
    /// competes for the next slice.
    pub fn tick(&mut self, table: &mut ProcessTable) -> Option<(Pid, Pid)> {
        self.ticks += 1;

        self.reap_terminated(table);
        self.wake_sleepers(table);

        if !self.online {
            return None;
        }

        let prev = self.current;
        let slice_expired = {
            let pcb = table.lookup_mut(prev).expect("tick without current");
            pcb.cpu_ticks += 1;
            if pcb.time_slice_remaining > 0 {
                pcb.time_slice_remaining -= 1;
            }
            pcb.time_slice_remaining == 0
        };

        if prev.is_idle() {
            // Idle runs only while nothing else is READY.
            let next = self.ready.pop_front(table)?;
            table.lookup_mut(prev).expect("idle vanished").state = ProcessState::Ready;
            self.set_running(table, next);
            return Some((prev, next));
        }

        if !slice_expired || self.ready.is_empty() {
            if slice_expired {
                // Nobody to preempt for; grant a fresh slice.
                table
                    .lookup_mut(prev)
                    .expect("tick without current")
                    .time_slice_remaining = TIME_SLICE_TICKS;
            }
            return None;
        }

        table.lookup_mut(prev).expect("tick without current").state = ProcessState::Ready;
        self.ready.push_back(table, prev);
        let next = self.pick_next(table);
        debug_assert!(next != prev);
        self.set_running(table, next);
        self.stats.preemptions += 1;
        Some((prev, next))
    }

    /// Terminate the running process and pick the successor. The caller
    /// must switch away with the one-way stub and never return here.
    pub fn exit_current(&mut self, table: &mut ProcessTable, code: i32) -> Pid {
        let prev = self.current;
        assert!(!prev.is_idle(), "exit from the idle process");

        {
            let pcb = table.lookup_mut(prev).expect("exit without current");
            pcb.state = ProcessState::Terminated;
            pcb.exit_code = code;
            pcb.wake_tick = 0;
        }
        self.stats.processes_terminated += 1;

        let next = self.pick_next(table);
        if next.is_idle() {
            table.lookup_mut(Pid::IDLE).expect("idle vanished").state =
                ProcessState::Running;
            self.current = Pid::IDLE;
            self.stats.context_switches += 1;
        } else {
            self.set_running(table, next);
        }
        next
    }

    /// Release every TERMINATED process except the current one.
    ///
    /// Exit cannot free the kernel stack it is still running on, so the
    /// reclamation happens here, one tick later, on somebody else's stack.
    fn reap_terminated(&mut self, table: &mut ProcessTable) {
        let mut doomed = [Pid::IDLE; MAX_PROCESSES];
        let mut count = 0;
        for pcb in table.iter() {
            if pcb.state == ProcessState::Terminated && pcb.pid != self.current {
                doomed[count] = pcb.pid;
                count += 1;
            }
        }
        for &pid in &doomed[..count] {
            table.release(pid).expect("reap of vanished process");
        }
    }

    /// Wake every sleeper whose tick has come, in slot order (FIFO-fair
    /// within a tick).
    fn wake_sleepers(&mut self, table: &mut ProcessTable) {
        let mut due = [Pid::IDLE; MAX_PROCESSES];
        let mut count = 0;
        for pcb in table.iter() {
            if pcb.state == ProcessState::Blocked
                && pcb.wake_tick > 0
                && pcb.wake_tick <= self.ticks
            {
                due[count] = pcb.pid;
                count += 1;
            }
        }
        for &pid in &due[..count] {
            table.lookup_mut(pid).expect("sleeper vanished").wake_tick = 0;
            self.unblock(table, pid);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Global scheduler instance.
pub static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

use crate::arch::x86_64::cpu::critical_section as critical;

/// Lock the scheduler and the process table (in that order) with interrupts
/// masked and run `f`.
pub fn with_kernel<R>(f: impl FnOnce(&mut Scheduler, &mut ProcessTable) -> R) -> R {
    critical(|| {
        let mut sched = SCHEDULER.lock();
        let mut table = PROCESS_TABLE.lock();
        f(&mut sched, &mut table)
    })
}

/// Initialize the global scheduler (idle PCB, PID 0) and enable the timer
/// hook.
pub fn init() {
    with_kernel(|sched, table| sched.init(table));
    crate::debug_println!("[OK] scheduler online (idle is PID 0)");
}

/// PID of the running process. Usable from any context, including panic
/// paths: if the scheduler lock is held it falls back to idle.
pub fn current_pid() -> Pid {
    critical(|| {
        SCHEDULER.try_lock().map(|s| s.current()).unwrap_or(Pid::IDLE)
    })
}

/// Current global tick count.
pub fn ticks() -> Tick {
    critical(|| {
        SCHEDULER.try_lock().map(|s| s.ticks()).unwrap_or(0)
    })
}

/// Snapshot of the scheduler counters.
pub fn stats() -> SchedulerStats {
    with_kernel(|sched, _| sched.stats())
}

/// Spawn a kernel thread. The entry function runs with interrupts enabled;
/// returning from it exits the thread with code 0.
pub fn spawn_kernel(name: &str, entry: fn()) -> KernelResult<Pid> {
    with_kernel(|sched, table| {
        let parent = sched.current();
        let pcb = table.allocate(name, ProcessFlags::empty())?;
        pcb.parent_pid = parent;
        pcb.kernel_entry = Some(entry);
        context::seed(pcb);
        let pid = pcb.pid();
        sched.make_ready(table, pid);
        Ok(pid)
    })
}

/// Everything the shell needs to apply a switch decision after the locks
/// are dropped.
struct SwitchHandles {
    prev_ctx: *mut context::Context,
    next_ctx: *const context::Context,
    next_kstack: x86_64::VirtAddr,
    next_root: Option<PhysFrame>,
}

fn resolve(table: &mut ProcessTable, prev: Pid, next: Pid) -> SwitchHandles {
    let (prev_ctx, next_ctx, next_kstack) = context::resolve_switch(table, prev, next);
    let next_root = next_pcb_root(table, next);
    SwitchHandles {
        prev_ctx,
        next_ctx,
        next_kstack,
        next_root,
    }
}

fn next_pcb_root(table: &ProcessTable, next: Pid) -> Option<PhysFrame> {
    table
        .lookup(next)
        .and_then(|pcb: &Pcb| pcb.address_space.as_ref())
        .map(|space| space.root())
}

/// Apply a switch decision: retarget the privileged stacks, install the
/// incoming address space if it has one, and swap kernel stacks.
///
/// # Safety
///
/// Must run with interrupts masked, with both kernel locks dropped, and
/// with handles resolved from live PCBs.
unsafe fn apply_switch(handles: SwitchHandles) {
    crate::arch::x86_64::set_kernel_stack(handles.next_kstack);
    if let Some(root) = handles.next_root {
        // SAFETY: every address space carries the shared kernel half.
        unsafe {
            crate::kernel::mm::address_space::install_root(root);
        }
    }
    // SAFETY: forwarded from the caller.
    unsafe {
        context::switch_ctx(handles.prev_ctx, handles.next_ctx);
    }
}

/// Voluntary yield from kernel or syscall context.
pub fn yield_now() {
    critical(|| {
        let handles = {
            let mut sched = SCHEDULER.lock();
            let mut table = PROCESS_TABLE.lock();
            sched
                .yield_current(&mut table)
                .map(|(prev, next)| resolve(&mut table, prev, next))
        };
        if let Some(handles) = handles {
            // SAFETY: interrupts are masked and the locks were just dropped.
            unsafe { apply_switch(handles) }
        }
    });
}

/// Sleep the running process for at least `ms` milliseconds.
pub fn sleep_ms(ms: u64) {
    critical(|| {
        let handles = {
            let mut sched = SCHEDULER.lock();
            let mut table = PROCESS_TABLE.lock();
            sched
                .sleep_current(&mut table, ms)
                .map(|(prev, next)| resolve(&mut table, prev, next))
        };
        if let Some(handles) = handles {
            // SAFETY: interrupts are masked and the locks were just dropped.
            unsafe { apply_switch(handles) }
        }
    });
}

/// Block the running process; [`unblock`] makes it runnable again.
pub fn block_current() {
    critical(|| {
        let handles = {
            let mut sched = SCHEDULER.lock();
            let mut table = PROCESS_TABLE.lock();
            let (prev, next) = sched.block_current(&mut table);
            resolve(&mut table, prev, next)
        };
        // SAFETY: interrupts are masked and the locks were just dropped.
        unsafe { apply_switch(handles) }
    });
}

/// Mark a BLOCKED process READY.
pub fn unblock(pid: Pid) {
    with_kernel(|sched, table| sched.unblock(table, pid));
}

/// Timer-interrupt hook: advance the tick and preempt if due. Runs with
/// interrupts already masked (interrupt gate).
pub fn timer_tick() {
    let handles = {
        let mut sched = SCHEDULER.lock();
        let mut table = PROCESS_TABLE.lock();
        sched
            .tick(&mut table)
            .map(|(prev, next)| resolve(&mut table, prev, next))
    };
    if let Some(handles) = handles {
        // SAFETY: IRQ context, interrupts masked, locks dropped. The switch
        // suspends this handler mid-flight; it completes when the process
        // is scheduled again.
        unsafe { apply_switch(handles) }
    }
}

/// Terminate the running process. Never returns.
///
/// The PCB is detached from scheduling immediately; its kernel stack and
/// address space are reclaimed by the table sweep on the next tick, which
/// runs on another stack. If the dying process owned the installed address
/// space, CR3 is moved to the kernel root first so the sweep can destroy
/// the space safely.
pub fn exit(code: i32) -> ! {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::disable();

    let (next_ctx, next_kstack, next_root, was_user) = {
        let mut sched = SCHEDULER.lock();
        let mut table = PROCESS_TABLE.lock();
        let was_user = table
            .lookup(sched.current())
            .is_some_and(|pcb| pcb.is_user());
        let next = sched.exit_current(&mut table, code);

        let next_pcb = table.lookup(next).expect("exit successor vanished");
        let next_ctx = &next_pcb.context as *const context::Context;
        let next_kstack = next_pcb.kstack_top;
        let next_root = next_pcb_root(&table, next);
        (next_ctx, next_kstack, next_root, was_user)
    };

    crate::arch::x86_64::set_kernel_stack(next_kstack);
    match next_root {
        Some(root) => {
            // SAFETY: switching to a live process's space.
            unsafe { crate::kernel::mm::address_space::install_root(root) }
        }
        None if was_user => {
            // Evacuate the dying address space before it is destroyed.
            // SAFETY: the kernel root maps all kernel code and data.
            unsafe { crate::kernel::mm::address_space::install_kernel_root() }
        }
        None => {}
    }

    // SAFETY: the successor context is live; this stack is abandoned and
    // reclaimed by the next reap sweep.
    unsafe { context::switch_to(next_ctx) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot() -> (Scheduler, ProcessTable) {
        let mut sched = Scheduler::new();
        let mut table = ProcessTable::new();
        sched.init(&mut table);
        (sched, table)
    }

    fn spawn(sched: &mut Scheduler, table: &mut ProcessTable, name: &str) -> Pid {
        let pcb = table.allocate(name, ProcessFlags::empty()).unwrap();
        pcb.kernel_entry = Some(|| {});
        let pid = pcb.pid();
        sched.make_ready(table, pid);
        pid
    }

    #[test]
    fn ready_queue_is_fifo() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        let b = spawn(&mut sched, &mut table, "b");
        let c = spawn(&mut sched, &mut table, "c");

        assert_eq!(sched.pick_next(&mut table), a);
        assert_eq!(sched.pick_next(&mut table), b);
        assert_eq!(sched.pick_next(&mut table), c);
        // Empty queue falls back to idle.
        assert_eq!(sched.pick_next(&mut table), Pid::IDLE);
    }

    #[test]
    fn tick_preempts_idle_when_work_arrives() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");

        let switch = sched.tick(&mut table);
        assert_eq!(switch, Some((Pid::IDLE, a)));
        assert_eq!(sched.current(), a);
        assert_eq!(
            table.lookup(a).unwrap().state(),
            ProcessState::Running
        );
    }

    #[test]
    fn slice_expiry_rotates_round_robin() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        let b = spawn(&mut sched, &mut table, "b");

        assert_eq!(sched.tick(&mut table), Some((Pid::IDLE, a)));

        // A runs its full slice, then B takes over.
        for _ in 0..TIME_SLICE_TICKS - 1 {
            assert_eq!(sched.tick(&mut table), None);
        }
        assert_eq!(sched.tick(&mut table), Some((a, b)));
        assert_eq!(table.lookup(a).unwrap().state(), ProcessState::Ready);

        // And back to A after B's slice.
        for _ in 0..TIME_SLICE_TICKS - 1 {
            assert_eq!(sched.tick(&mut table), None);
        }
        assert_eq!(sched.tick(&mut table), Some((b, a)));
    }

    #[test]
    fn lone_process_keeps_cpu_with_fresh_slice() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        assert_eq!(sched.tick(&mut table), Some((Pid::IDLE, a)));

        for _ in 0..3 * TIME_SLICE_TICKS {
            assert_eq!(sched.tick(&mut table), None);
        }
        assert_eq!(sched.current(), a);
    }

    #[test]
    fn yield_rotates_and_solo_yield_is_a_noop() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        let b = spawn(&mut sched, &mut table, "b");
        sched.tick(&mut table);
        assert_eq!(sched.current(), a);

        assert_eq!(sched.yield_current(&mut table), Some((a, b)));
        assert_eq!(sched.yield_current(&mut table), Some((b, a)));

        // Drain B via block, then a solo yield keeps the CPU.
        sched.yield_current(&mut table); // a -> b
        let (_, _) = sched.block_current(&mut table); // b blocks, a runs
        assert_eq!(sched.current(), a);
        assert_eq!(sched.yield_current(&mut table), None);
    }

    #[test]
    fn sleep_zero_is_a_yield() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        let b = spawn(&mut sched, &mut table, "b");
        sched.tick(&mut table);

        assert_eq!(sched.sleep_current(&mut table, 0), Some((a, b)));
        assert_eq!(table.lookup(a).unwrap().state(), ProcessState::Ready);
        assert_eq!(table.lookup(a).unwrap().wake_tick(), 0);
    }

    #[test]
    fn sleep_sets_wake_tick_with_ceiling_division() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        sched.tick(&mut table); // tick 1, a running

        let now = sched.ticks();
        sched.sleep_current(&mut table, 95); // ceil(95 / 10) = 10
        assert_eq!(table.lookup(a).unwrap().wake_tick(), now + 10);
        assert_eq!(table.lookup(a).unwrap().state(), ProcessState::Blocked);
        assert_eq!(sched.current(), Pid::IDLE);
    }

    #[test]
    fn sleeper_wakes_on_schedule_and_runs_within_a_slice() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        sched.tick(&mut table);

        sched.sleep_current(&mut table, 100); // 10 ticks
        let wake = table.lookup(a).unwrap().wake_tick();

        let mut resumed_at = None;
        for _ in 0..20 {
            if let Some((_, next)) = sched.tick(&mut table) {
                if next == a {
                    resumed_at = Some(sched.ticks());
                    break;
                }
            }
        }
        let resumed_at = resumed_at.expect("sleeper never resumed");
        assert!(resumed_at >= wake);
        assert!(resumed_at <= wake + 1);
        assert_eq!(table.lookup(a).unwrap().wake_tick(), 0);
    }

    #[test]
    fn wake_order_follows_slot_order_within_a_tick() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        let b = spawn(&mut sched, &mut table, "b");
        sched.tick(&mut table); // a running

        // Both sleep until the same tick; b first, a second.
        sched.sleep_current(&mut table, 30); // a blocks, b runs
        assert_eq!(sched.current(), b);
        sched.sleep_current(&mut table, 30);
        assert_eq!(sched.current(), Pid::IDLE);

        while table.lookup(a).unwrap().state() == ProcessState::Blocked {
            sched.tick(&mut table);
        }
        // Slot order: a was allocated first, so it runs first.
        assert_eq!(sched.current(), a);
        assert_eq!(table.lookup(b).unwrap().state(), ProcessState::Ready);
    }

    #[test]
    fn exit_reaps_on_the_next_tick() {
        let (mut sched, mut table) = boot();
        let a = spawn(&mut sched, &mut table, "a");
        sched.tick(&mut table);

        let next = sched.exit_current(&mut table, 7);
        assert_eq!(next, Pid::IDLE);
        assert_eq!(
            table.lookup(a).unwrap().state(),
            ProcessState::Terminated
        );
        assert_eq!(table.lookup(a).unwrap().exit_code(), 7);
        assert_eq!(sched.stats().processes_terminated, 1);

        sched.tick(&mut table);
        assert!(table.lookup(a).is_none(), "zombie survived the sweep");
    }

    #[test]
    fn exactly_one_process_runs_at_any_time() {
        let (mut sched, mut table) = boot();
        for name in ["a", "b", "c"] {
            spawn(&mut sched, &mut table, name);
        }

        for _ in 0..50 {
            sched.tick(&mut table);
            let running: alloc::vec::Vec<Pid> = table
                .iter()
                .filter(|p| p.state() == ProcessState::Running)
                .map(|p| p.pid())
                .collect();
            assert_eq!(running, alloc::vec![sched.current()]);
        }
    }
}
