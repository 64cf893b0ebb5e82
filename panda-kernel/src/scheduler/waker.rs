//! `core::task::Waker` backed by a thread ID.
//!
//! Built fresh on every poll attempt (see `poll_pending_syscall`), so a
//! future never needs to hold onto it across a block — the actual wake
//! path runs out of band, through `scheduler::wake_thread`, called
//! directly by the object a thread is blocked on (channel, VMO) when its
//! condition becomes true. Waking this `Waker` is equivalent to calling
//! `wake_thread` on the ID it was built from.
//!
//! Mirrors the old single-waiter `process::Waker::wake()` →
//! `scheduler::wake_process(pid)` path, generalized to `ThreadId` and to
//! the standard `core::task::Waker` vtable so it can be handed to
//! `Future::poll`.

use core::task::{RawWaker, RawWakerVTable, Waker};

use crate::thread::ThreadId;

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);

unsafe fn clone(data: *const ()) -> RawWaker {
    RawWaker::new(data, &VTABLE)
}

unsafe fn wake(data: *const ()) {
    wake_by_ref(data);
}

unsafe fn wake_by_ref(data: *const ()) {
    let tid = ThreadId::from_u64(data as u64);
    crate::scheduler::wake_thread(tid);
}

unsafe fn drop(_data: *const ()) {}

/// Build a `Waker` that resolves to waking `tid`.
pub struct ThreadWaker;

impl ThreadWaker {
    pub fn into_waker(tid: ThreadId) -> Waker {
        let raw = RawWaker::new(tid.as_u64() as *const (), &VTABLE);
        unsafe { Waker::from_raw(raw) }
    }
}
