//! Threads: the schedulable unit.
//!
//! Every process owns exactly one thread today (the syscall catalogue has
//! no thread-creation operation), but the split is real: `Thread` carries
//! everything the scheduler touches (register state, run state, pending
//! syscall future), while `Process` carries everything an address space
//! owns (handle table, VMO mappings, job membership). Grounded on the
//! fields that used to live directly on `Process` (`state`, `last_scheduled`,
//! `sp`/`ip`, `saved_state`) in the pre-split scheduler.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU64, Ordering};

use spinning_top::Spinlock;
use x86_64::VirtAddr;

use crate::process::{Process, SavedState};
use crate::scheduler::RTC;
use crate::syscall::{CalleeSavedRegs, PendingSyscall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ThreadId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(id: u64) -> Self {
        ThreadId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadState {
    Runnable,
    Running,
    Blocked,
    Exited,
}

struct Mutable {
    state: ThreadState,
    last_scheduled: RTC,
    sp: VirtAddr,
    ip: VirtAddr,
    saved_state: Option<SavedState>,
    /// Callee-saved registers to restore when resuming a thread that
    /// voluntarily yielded (as opposed to one preempted mid-instruction,
    /// whose full register file lives in `saved_state`, or one returning
    /// from a completed async syscall, whose registers live in its
    /// `PendingSyscall`). `sysretq` only clobbers `rcx`/`r11`, but the
    /// scheduler runs arbitrary other threads' kernel code on the same
    /// stack while this thread is off-CPU, which can clobber rbx/rbp/r12-r15
    /// in between — so these must be restored explicitly rather than relying
    /// on them surviving untouched.
    resume_callee_saved: Option<CalleeSavedRegs>,
    pending_syscall: Option<PendingSyscall>,
}

/// A schedulable thread of execution within a [`Process`].
pub struct Thread {
    id: ThreadId,
    process: Weak<Process>,
    mutable: Spinlock<Mutable>,
}

impl Thread {
    pub fn new(process: &Arc<Process>, ip: VirtAddr, sp: VirtAddr) -> Arc<Thread> {
        Arc::new(Thread {
            id: ThreadId::new(),
            process: Arc::downgrade(process),
            mutable: Spinlock::new(Mutable {
                state: ThreadState::Runnable,
                last_scheduled: RTC::zero(),
                sp,
                ip,
                saved_state: None,
                resume_callee_saved: None,
                pending_syscall: None,
            }),
        })
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    pub fn state(&self) -> ThreadState {
        self.mutable.lock().state
    }

    pub fn set_state(&self, state: ThreadState) {
        self.mutable.lock().state = state;
    }

    pub fn last_scheduled(&self) -> RTC {
        self.mutable.lock().last_scheduled
    }

    pub fn reset_last_scheduled(&self) {
        self.mutable.lock().last_scheduled = RTC::now();
    }

    /// `(ip, sp, page_table_phys, saved_state)`. Panics if the owning
    /// process has already been dropped, which cannot happen while the
    /// thread is still scheduled (the process keeps its threads alive).
    pub fn exec_params(&self) -> (VirtAddr, VirtAddr, x86_64::PhysAddr, Option<SavedState>) {
        let process = self.process().expect("thread outlived its process");
        let guard = self.mutable.lock();
        (guard.ip, guard.sp, process.page_table_phys(), guard.saved_state)
    }

    pub fn save_state(&self, state: SavedState) {
        let mut guard = self.mutable.lock();
        guard.ip = VirtAddr::new(state.rip);
        guard.sp = VirtAddr::new(state.rsp);
        guard.saved_state = Some(state);
    }

    /// Record where a voluntarily-yielding thread should resume, along with
    /// the callee-saved registers it had at the point of the syscall.
    pub fn set_resume_point(&self, ip: VirtAddr, sp: VirtAddr, callee_saved: CalleeSavedRegs) {
        let mut guard = self.mutable.lock();
        guard.ip = ip;
        guard.sp = sp;
        guard.saved_state = None;
        guard.resume_callee_saved = Some(callee_saved);
    }

    pub fn take_saved_state(&self) -> Option<SavedState> {
        self.mutable.lock().saved_state.take()
    }

    pub fn take_resume_callee_saved(&self) -> Option<CalleeSavedRegs> {
        self.mutable.lock().resume_callee_saved.take()
    }

    pub fn take_pending_syscall(&self) -> Option<PendingSyscall> {
        self.mutable.lock().pending_syscall.take()
    }

    pub fn set_pending_syscall(&self, pending: PendingSyscall) {
        self.mutable.lock().pending_syscall = Some(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_is_runnable() {
        let tid = ThreadId::new();
        assert_ne!(tid.as_u64(), ThreadId::new().as_u64());
    }
}
