//! A multi-waiter FIFO wait queue.
//!
//! Generalizes the single-waiter `process::Waker` (one `Option<ProcessId>`)
//! into a FIFO of `ThreadId`s, since a channel endpoint or VMO can now have
//! more than one thread blocked on it at once. Waking pops (or drains) the
//! queue and hands the caller the thread IDs to move back to RUNNABLE; the
//! queue itself does not touch scheduler state, keeping the lock-order
//! `process -> handle-table -> object -> object.internal` intact (the
//! scheduler is only ever touched after this lock is released).

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use spinning_top::Spinlock;

use crate::thread::ThreadId;

pub struct WaitQueue {
    waiters: Spinlock<VecDeque<ThreadId>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            waiters: Spinlock::new(VecDeque::new()),
        }
    }

    /// Park a thread on this queue. Callers must have already transitioned
    /// the thread to BLOCKED (see `scheduler::block_current`) before
    /// releasing whatever lock protects the wait condition, so that a
    /// concurrent wake cannot be lost.
    pub fn enqueue(&self, tid: ThreadId) {
        self.waiters.lock().push_back(tid);
    }

    /// Wake the oldest waiter, if any.
    pub fn wake_one(&self) -> Option<ThreadId> {
        self.waiters.lock().pop_front()
    }

    /// Wake every waiter (used on peer-close, end-of-stream fan-out).
    pub fn wake_all(&self) -> Vec<ThreadId> {
        self.waiters.lock().drain(..).collect()
    }

    pub fn remove(&self, tid: ThreadId) {
        self.waiters.lock().retain(|&t| t != tid);
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
