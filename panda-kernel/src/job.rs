//! Job objects: a strong-owning parent for a group of processes.
//!
//! Per §9's design note, the parent/child relationship is one-directional
//! in ownership terms: a `Job` holds strong `Arc<Process>` references to
//! its children, while each `Process` holds only a `Weak<Job>` back to its
//! parent. This keeps the object graph acyclic so a job's children are
//! freed as soon as the job itself is dropped and no other handle keeps
//! them alive.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spinning_top::Spinlock;

use crate::process::{Process, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        JobId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

pub struct Job {
    id: JobId,
    children: Spinlock<Vec<Arc<Process>>>,
}

impl Job {
    pub fn new() -> Arc<Job> {
        Arc::new(Job {
            id: JobId::new(),
            children: Spinlock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn add_child(&self, process: Arc<Process>) {
        self.children.lock().push(process);
    }

    pub fn remove_child(&self, process: &Arc<Process>) {
        self.children.lock().retain(|p| !Arc::ptr_eq(p, process));
    }

    /// Same as `remove_child`, but keyed by ID — used from `Process` itself
    /// on exit, where only `&self` (not an `Arc<Process>`) is available.
    pub fn remove_child_by_id(&self, id: ProcessId) {
        self.children.lock().retain(|p| p.id() != id);
    }

    pub fn children(&self) -> Vec<Arc<Process>> {
        self.children.lock().clone()
    }
}

static ROOT_JOB: Spinlock<Option<Arc<Job>>> = Spinlock::new(None);

/// Initialize the root job. Called once during kernel bring-up; every
/// process spawned without an explicit parent job becomes a child of this
/// one.
pub fn init() {
    *ROOT_JOB.lock() = Some(Job::new());
}

pub fn root() -> Arc<Job> {
    ROOT_JOB
        .lock()
        .clone()
        .expect("job::init() must run before job::root()")
}
