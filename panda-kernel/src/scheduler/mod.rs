//! Thread scheduler: preemption, blocking, and fair dispatch.
//!
//! Every online CPU would own its own run queue in a full SMP bring-up (see
//! §4.7); this tree only ever brings up the boot CPU (see DESIGN.md), so
//! `Scheduler` holds a single run queue rather than one per `CpuId`. The
//! fairness policy — a `BinaryHeap<(Reverse<RTC>, ThreadId)>` per state,
//! picking the least-recently-scheduled runnable thread — carries over
//! unchanged from the process-keyed scheduler this replaces.

mod context_switch;
mod deadline;
mod rtc;
mod waker;

use core::cmp::Reverse;
use core::task::Poll;

use alloc::collections::{BTreeMap, BinaryHeap};
use alloc::sync::Arc;
use log::{debug, info, warn};
use spinning_top::RwSpinlock;

use crate::process::{
    Process, return_from_deferred_syscall, return_from_interrupt, return_from_syscall,
};
use crate::syscall::CalleeSavedRegs;
use crate::syscall::user_ptr::SyscallResult;
use crate::thread::{Thread, ThreadId, ThreadState};

pub use rtc::RTC;
pub use waker::ThreadWaker;

pub(crate) static SCHEDULER: RwSpinlock<Option<Scheduler>> = RwSpinlock::new(None);

/// Timer vector the preemption handler is installed on (the Local APIC
/// timer's calibrated vector).
const TIMER_VECTOR: u8 = crate::apic::timer::TIMER_VECTOR;

/// Time slice in milliseconds.
const TIME_SLICE_MS: u32 = 10;

pub(crate) struct Scheduler {
    threads: BTreeMap<ThreadId, Arc<Thread>>,
    /// Maps each state to a min-heap of (last_scheduled, thread), ordered by
    /// `Reverse<RTC>` so the least-recently-scheduled thread is picked first.
    states: BTreeMap<ThreadState, BinaryHeap<(Reverse<RTC>, ThreadId)>>,
    /// The thread `prepare_next_runnable` most recently selected.
    current: ThreadId,
    deadline_tracker: deadline::DeadlineTracker,
}

impl Scheduler {
    fn new(boot_thread: Arc<Thread>) -> Self {
        let tid = boot_thread.id();
        let mut scheduler = Self {
            threads: BTreeMap::new(),
            states: BTreeMap::new(),
            current: tid,
            deadline_tracker: deadline::DeadlineTracker::new(),
        };
        scheduler.add(boot_thread);
        scheduler
    }

    pub fn add(&mut self, thread: Arc<Thread>) {
        let tid = thread.id();
        let state = thread.state();
        let last_scheduled = thread.last_scheduled();
        self.threads.insert(tid, thread);
        self.add_to_state(state, tid, last_scheduled);
    }

    /// Find the next runnable thread, promoting it to RUNNING and updating
    /// its RTC timestamp for fairness.
    ///
    /// Stale thread IDs (removed from `threads` between being pushed onto
    /// the heap and being popped, e.g. by a concurrent exit) are silently
    /// skipped rather than panicking — the same race the process-keyed
    /// scheduler already tolerated.
    pub fn prepare_next_runnable(&mut self) -> Option<ThreadId> {
        assert!(
            self.states
                .entry(ThreadState::Running)
                .or_default()
                .is_empty()
        );

        let runnable = self.states.entry(ThreadState::Runnable).or_default();
        while let Some((_, tid)) = runnable.pop() {
            let Some(thread) = self.threads.get(&tid) else {
                warn!("prepare_next_runnable: thread {tid:?} no longer exists, skipping");
                continue;
            };
            thread.reset_last_scheduled();
            thread.set_state(ThreadState::Running);
            self.current = tid;
            return Some(tid);
        }
        None
    }

    /// Remove a thread from the scheduler, returning it for deferred
    /// dropping outside the scheduler lock (dropping a `Thread` may drop its
    /// `Process`, whose handle table may close channels and wake peers,
    /// which needs this same lock).
    pub fn remove_thread(&mut self, tid: ThreadId) -> Option<Arc<Thread>> {
        for state in [
            ThreadState::Runnable,
            ThreadState::Running,
            ThreadState::Blocked,
        ] {
            self.remove_from_state(state, tid);
        }
        self.deadline_tracker.cancel(tid);
        self.threads.remove(&tid)
    }

    pub fn current_thread_id(&self) -> ThreadId {
        self.current
    }

    fn change_state(&mut self, tid: ThreadId, state: ThreadState) -> bool {
        let Some(thread) = self.threads.get(&tid) else {
            warn!("change_state: thread {tid:?} no longer exists, ignoring state change");
            return false;
        };
        let prior_state = thread.state();
        let last_scheduled = thread.last_scheduled();
        thread.set_state(state);

        self.remove_from_state(prior_state, tid);
        self.add_to_state(state, tid, last_scheduled);
        true
    }

    fn remove_from_state(&mut self, state: ThreadState, tid: ThreadId) {
        self.states
            .entry(state)
            .or_default()
            .retain(|(_, other)| *other != tid);
    }

    fn add_to_state(&mut self, state: ThreadState, tid: ThreadId, last_scheduled: RTC) {
        self.states
            .entry(state)
            .or_default()
            .push((Reverse(last_scheduled), tid));
    }

    pub(super) fn has_other_runnable(&self) -> bool {
        self.states
            .get(&ThreadState::Runnable)
            .map_or(false, |heap| !heap.is_empty())
    }

    pub fn register_deadline(&mut self, tid: ThreadId, deadline_ms: u64) {
        self.deadline_tracker.register(tid, deadline_ms);
    }

    pub fn cancel_deadline(&mut self, tid: ThreadId) {
        self.deadline_tracker.cancel(tid);
    }

    pub fn wake_deadline_threads(&mut self, now_ms: u64) -> usize {
        let threads = self.deadline_tracker.collect_expired(now_ms);
        let count = threads.len();
        for tid in threads {
            self.change_state(tid, ThreadState::Runnable);
        }
        count
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadline_tracker.next_deadline()
    }
}

/// Initialize the scheduler with the init process's one thread and install
/// the preemption timer handler.
pub fn init(init_process: &Arc<Process>) {
    use context_switch::{preemptable_interrupt_entry, timer_interrupt_handler};
    let entry = preemptable_interrupt_entry!(timer_interrupt_handler);
    unsafe {
        crate::interrupts::set_raw_handler(TIMER_VECTOR, entry as *const () as u64);
    }
    debug!("Preemption initialized with {}ms time slice", TIME_SLICE_MS);

    let mut scheduler = SCHEDULER.write();
    assert!(scheduler.is_none(), "scheduler already initialized");
    *scheduler = Some(Scheduler::new(init_process.thread()));
}

/// Start the preemption timer. Called before jumping to userspace.
pub(super) fn start_timer() {
    crate::apic::set_timer_oneshot(TIME_SLICE_MS);
}

/// Start the preemption timer with deadline awareness: fires at
/// `min(TIME_SLICE_MS, time_until_next_deadline)` so a blocked receiver's
/// timeout is never missed by more than a full time slice.
pub(super) fn start_timer_with_deadline() {
    let timer_duration = {
        let scheduler = SCHEDULER.read();
        let scheduler = scheduler.as_ref().expect("Scheduler not initialized");
        let now = crate::time::uptime_ms();

        if let Some(deadline) = scheduler.next_deadline() {
            let time_until_deadline = deadline.saturating_sub(now);
            time_until_deadline.min(TIME_SLICE_MS as u64).max(1) as u32
        } else {
            TIME_SLICE_MS
        }
    };

    crate::apic::set_timer_oneshot(timer_duration);
}

/// Add a freshly spawned process's thread to the scheduler.
pub fn add_thread(process: &Arc<Process>) {
    let mut scheduler = SCHEDULER.write();
    let scheduler = scheduler
        .as_mut()
        .expect("Scheduler has not been initialized");
    scheduler.add(process.thread());
}

/// Register a deadline (ms since boot) for the current thread, used by
/// `channel_recv`'s optional timeout argument.
pub fn register_current_deadline(deadline_ms: u64) {
    with_scheduler_mut(|scheduler| {
        let tid = scheduler.current_thread_id();
        scheduler.register_deadline(tid, deadline_ms);
    });
}

/// Cancel any deadline registered for the current thread (called once its
/// blocking operation completes, so a stale timeout doesn't also fire).
pub fn cancel_current_deadline() {
    with_scheduler_mut(|scheduler| {
        let tid = scheduler.current_thread_id();
        scheduler.cancel_deadline(tid);
    });
}

fn with_scheduler_mut<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let mut guard = SCHEDULER.write();
    let scheduler = guard.as_mut().expect("Scheduler has not been initialized");
    f(scheduler)
}

/// Outcome of polling a thread's pending async syscall.
enum PendingSyscallOutcome {
    Completed(SyscallResult, CalleeSavedRegs),
    Blocked,
    NoPending,
}

/// Take and poll the pending async syscall for `tid`, if any.
///
/// The scheduler lock is dropped before polling (the future may itself
/// touch scheduler state, e.g. on completion) and re-acquired only to put
/// the future back or discard it.
fn poll_pending_syscall(tid: ThreadId) -> Option<PendingSyscallOutcome> {
    let pending_syscall = with_scheduler_mut(|scheduler| {
        let Some(thread) = scheduler.threads.get(&tid) else {
            warn!("poll_pending_syscall: thread {tid:?} vanished, skipping");
            return None;
        };
        scheduler.current = tid;
        Some(thread.take_pending_syscall())
    });

    let pending_syscall = pending_syscall?;
    let Some(pending) = pending_syscall else {
        return Some(PendingSyscallOutcome::NoPending);
    };

    let waker = ThreadWaker::into_waker(tid);
    let mut cx = core::task::Context::from_waker(&waker);
    let result = pending.future.lock().as_mut().poll(&mut cx);

    match result {
        Poll::Pending => {
            with_scheduler_mut(|scheduler| {
                if let Some(thread) = scheduler.threads.get(&tid) {
                    thread.set_pending_syscall(pending);
                } else {
                    warn!(
                        "poll_pending_syscall: thread {tid:?} removed while polling, discarding future"
                    );
                }
            });
            Some(PendingSyscallOutcome::Blocked)
        }
        Poll::Ready(result) => Some(PendingSyscallOutcome::Completed(
            result,
            pending.callee_saved,
        )),
    }
}

/// Dispatch a completed async syscall result back to userspace.
///
/// # Safety
/// This function does not return — it jumps to userspace.
unsafe fn dispatch_completed_syscall(
    tid: ThreadId,
    result: SyscallResult,
    callee_saved: CalleeSavedRegs,
) -> Option<core::convert::Infallible> {
    let exec_params = with_scheduler_mut(|scheduler| {
        let thread = scheduler.threads.get(&tid)?;
        scheduler.current = tid;
        let (ip, sp, pt, _) = thread.exec_params();
        Some((ip, sp, pt))
    });

    let (ip, sp, page_table) = exec_params?;

    unsafe {
        crate::memory::switch_page_table(page_table);
    }

    if !result.writeback.is_empty() {
        let ua = unsafe { crate::syscall::user_ptr::UserAccess::new() };
        for wb in &result.writeback {
            let _ = ua.write(wb.dst, &wb.data);
        }
    }

    debug!(
        "dispatch_completed_syscall: tid={tid:?}, result={}, ip={:#x}, sp={:#x}",
        result.code,
        ip.as_u64(),
        sp.as_u64(),
    );
    start_timer_with_deadline();
    unsafe { return_from_deferred_syscall(ip.as_u64(), sp.as_u64(), result.code as u64, &callee_saved) }
}

/// Dispatch a thread with no pending syscall: resume from preemption if a
/// `SavedState` is present, resume a voluntary yield if callee-saved
/// registers were stashed for it, or otherwise start fresh at its current
/// `ip`/`sp` (a never-yet-run thread).
///
/// # Safety
/// This function does not return — it jumps to userspace.
unsafe fn dispatch_normal_thread(tid: ThreadId) -> Option<core::convert::Infallible> {
    let exec_params = with_scheduler_mut(|scheduler| {
        let thread = scheduler.threads.get(&tid)?;
        scheduler.current = tid;
        let saved_state = thread.take_saved_state();
        let resume_callee_saved = thread.take_resume_callee_saved();
        let (ip, sp, pt, _) = thread.exec_params();
        Some((ip, sp, pt, saved_state, resume_callee_saved))
    });

    let (ip, sp, page_table, saved_state, resume_callee_saved) = exec_params?;

    debug!("dispatch_normal_thread: jumping to userspace (tid={tid:?})");
    unsafe {
        crate::memory::switch_page_table(page_table);
    }
    start_timer_with_deadline();

    if let Some(state) = saved_state {
        unsafe { return_from_interrupt(&state) }
    } else if let Some(callee_saved) = resume_callee_saved {
        unsafe { return_from_deferred_syscall(ip.as_u64(), sp.as_u64(), 0, &callee_saved) }
    } else {
        unsafe { return_from_syscall(ip, sp, 0) }
    }
}

/// Execute the next runnable thread in an infinite scheduling loop.
///
/// # Safety
/// This function does not return. It switches to userspace or halts
/// waiting for an interrupt.
pub unsafe fn exec_next_runnable() -> ! {
    loop {
        let (next, has_threads) = with_scheduler_mut(|scheduler| {
            let next = scheduler.prepare_next_runnable();
            (next, !scheduler.threads.is_empty())
        });

        match next {
            Some(tid) => {
                let outcome = poll_pending_syscall(tid);
                let Some(outcome) = outcome else {
                    continue;
                };

                match outcome {
                    PendingSyscallOutcome::Completed(result, callee_saved) => {
                        if (unsafe { dispatch_completed_syscall(tid, result, callee_saved) })
                            .is_none()
                        {
                            warn!(
                                "exec_next_runnable: thread {tid:?} removed before async syscall return"
                            );
                            continue;
                        }
                    }
                    PendingSyscallOutcome::Blocked => {
                        with_scheduler_mut(|scheduler| {
                            scheduler.change_state(tid, ThreadState::Blocked);
                        });
                        continue;
                    }
                    PendingSyscallOutcome::NoPending => {
                        if (unsafe { dispatch_normal_thread(tid) }).is_none() {
                            warn!("exec_next_runnable: thread {tid:?} removed before dispatch");
                            continue;
                        }
                    }
                }
            }

            None if has_threads => {
                // No runnable threads, but some are blocked — idle until an
                // interrupt (deadline or external wake) makes one runnable.
                start_timer_with_deadline();
                x86_64::instructions::interrupts::enable_and_hlt();
                x86_64::instructions::interrupts::disable();
            }
            None => {
                info!("No threads remaining, halting");
                crate::qemu::exit_qemu(crate::qemu::QemuExitCode::Success);
            }
        }
    }
}

/// Remove a thread's process from the scheduler and drop it (outside the
/// scheduler lock, since dropping it may close channels and wake peers).
pub fn remove_current_thread() {
    let thread = {
        let mut scheduler = SCHEDULER.write();
        let scheduler = scheduler
            .as_mut()
            .expect("Scheduler has not been initialized");
        let tid = scheduler.current;
        scheduler.remove_thread(tid)
    };
    drop(thread);
}

/// The thread id the scheduler most recently dispatched or is polling.
pub fn current_thread_id() -> ThreadId {
    let scheduler = SCHEDULER.read();
    let scheduler = scheduler.as_ref().expect("Scheduler has not been initialized");
    scheduler.current_thread_id()
}

/// The thread the scheduler is currently running.
///
/// `expect()`s here document a kernel invariant: `current` is always set to
/// a valid, live thread id by `exec_next_runnable` before any code path
/// that calls `current_thread` runs.
pub fn current_thread() -> Arc<Thread> {
    let scheduler = SCHEDULER.read();
    let scheduler = scheduler.as_ref().expect("Scheduler has not been initialized");
    scheduler
        .threads
        .get(&scheduler.current)
        .cloned()
        .expect("current thread not found")
}

/// The process owning the thread the scheduler is currently running.
pub fn current_process() -> Arc<Process> {
    current_thread()
        .process()
        .expect("current thread outlived its process")
}

/// Yield the current thread: save its resume point and callee-saved
/// registers, then switch to the next runnable thread.
///
/// # Safety
/// This function does not return to the caller.
pub unsafe fn yield_current(
    return_ip: x86_64::VirtAddr,
    return_sp: x86_64::VirtAddr,
    callee_saved: CalleeSavedRegs,
) -> ! {
    {
        let mut scheduler = SCHEDULER.write();
        let scheduler = scheduler
            .as_mut()
            .expect("Scheduler has not been initialized");

        let tid = scheduler.current_thread_id();
        let thread = scheduler
            .threads
            .get(&tid)
            .expect("Current thread not found")
            .clone();

        thread.set_resume_point(return_ip, return_sp, callee_saved);
        scheduler.change_state(tid, ThreadState::Runnable);
    }

    unsafe {
        exec_next_runnable();
    }
}

/// Wake a blocked thread, making it runnable again. A no-op if the thread no
/// longer exists or isn't currently blocked (e.g. it was already woken by
/// something else) — both expected outcomes, not errors.
pub fn wake_thread(tid: ThreadId) {
    let mut scheduler = SCHEDULER.write();
    let scheduler = scheduler
        .as_mut()
        .expect("Scheduler has not been initialized");

    if let Some(thread) = scheduler.threads.get(&tid) {
        if thread.state() == ThreadState::Blocked {
            scheduler.change_state(tid, ThreadState::Runnable);
            debug!("Woke thread {:?}", tid);
        }
    }
}
