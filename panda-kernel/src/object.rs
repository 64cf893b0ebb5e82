//! The kernel object sum type.
//!
//! The source represented polymorphic objects as a struct of function
//! pointers (see `resource::Resource` in the version of this tree before
//! this module existed). We instead close the set of object kinds over a
//! single enum: every variant is an `Arc` around the type's own state, so
//! `object_ref`/`object_deref` are just `Clone`/`Drop` on the enum, and the
//! refcount the data model calls for falls out of `Arc::strong_count`.
//!
//! Avoiding cyclic strong references (e.g. parent job <-> child process) is
//! a property of the individual object types, not of this enum: a `Job`
//! holds strong `Arc<Process>` children, while a `Process` holds only a
//! `Weak<Job>` back-reference.

use alloc::sync::Arc;

use panda_abi::ObjectType;

use crate::channel::Channel;
use crate::job::Job;
use crate::namespace::NsDir;
use crate::process::Process;
use crate::thread::Thread;
use crate::vmo::Vmo;

/// A kernel object: whatever a handle ultimately refers to.
#[derive(Clone)]
pub enum KernelObject {
    Process(Arc<Process>),
    Thread(Arc<Thread>),
    Channel(Arc<Channel>),
    Vmo(Arc<Vmo>),
    Job(Arc<Job>),
    NsDir(Arc<NsDir>),
}

impl KernelObject {
    pub fn object_type(&self) -> ObjectType {
        match self {
            KernelObject::Process(_) => ObjectType::Process,
            KernelObject::Thread(_) => ObjectType::Thread,
            KernelObject::Channel(_) => ObjectType::Channel,
            KernelObject::Vmo(_) => ObjectType::Vmo,
            KernelObject::Job(_) => ObjectType::Job,
            KernelObject::NsDir(_) => ObjectType::NsDir,
        }
    }

    /// Mirrors `Object.refcount` from the data model: the number of live
    /// strong references to this object (handles, namespace entries, and
    /// any transient borrow the caller is holding).
    pub fn ref_count(&self) -> usize {
        match self {
            KernelObject::Process(p) => Arc::strong_count(p),
            KernelObject::Thread(t) => Arc::strong_count(t),
            KernelObject::Channel(c) => Arc::strong_count(c),
            KernelObject::Vmo(v) => Arc::strong_count(v),
            KernelObject::Job(j) => Arc::strong_count(j),
            KernelObject::NsDir(n) => Arc::strong_count(n),
        }
    }

    pub fn as_process(&self) -> Option<&Arc<Process>> {
        match self {
            KernelObject::Process(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&Arc<Thread>> {
        match self {
            KernelObject::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&Arc<Channel>> {
        match self {
            KernelObject::Channel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_vmo(&self) -> Option<&Arc<Vmo>> {
        match self {
            KernelObject::Vmo(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_job(&self) -> Option<&Arc<Job>> {
        match self {
            KernelObject::Job(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_ns_dir(&self) -> Option<&Arc<NsDir>> {
        match self {
            KernelObject::NsDir(n) => Some(n),
            _ => None,
        }
    }
}

impl From<Arc<Process>> for KernelObject {
    fn from(p: Arc<Process>) -> Self {
        KernelObject::Process(p)
    }
}

impl From<Arc<Thread>> for KernelObject {
    fn from(t: Arc<Thread>) -> Self {
        KernelObject::Thread(t)
    }
}

impl From<Arc<Channel>> for KernelObject {
    fn from(c: Arc<Channel>) -> Self {
        KernelObject::Channel(c)
    }
}

impl From<Arc<Vmo>> for KernelObject {
    fn from(v: Arc<Vmo>) -> Self {
        KernelObject::Vmo(v)
    }
}

impl From<Arc<Job>> for KernelObject {
    fn from(j: Arc<Job>) -> Self {
        KernelObject::Job(j)
    }
}

impl From<Arc<NsDir>> for KernelObject {
    fn from(n: Arc<NsDir>) -> Self {
        KernelObject::NsDir(n)
    }
}
