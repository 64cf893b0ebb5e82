//! Per-process handle table.
//!
//! A dense array of (object, rights) slots, indexed by small integers and
//! reused lowest-free-slot first (see §4.1/§9: "small integers are fast to
//! validate and communicate to user space... on close, simply clear the
//! slot"). `HandleId::INVALID` is the sentinel that never names a live
//! entry.

use alloc::vec::Vec;

use panda_abi::Rights;

use crate::error::{KError, KResult};
use crate::object::KernelObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u32);

impl HandleId {
    pub const INVALID: HandleId = HandleId(u32::MAX);

    pub fn from_u64(v: u64) -> Option<HandleId> {
        if v == panda_abi::INVALID_HANDLE || v > u32::MAX as u64 {
            return None;
        }
        Some(HandleId(v as u32))
    }

    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

struct Entry {
    object: KernelObject,
    rights: Rights,
}

/// A process's handle table.
///
/// Access is serialized by the caller (the owning `Process` keeps this
/// behind its own lock); lookup during a syscall pins the object for the
/// call's duration by cloning the `Arc` while the lock is held.
pub struct HandleTable {
    slots: Vec<Option<Entry>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Insert a new handle at the lowest free slot, incrementing the
    /// object's refcount (the clone the caller already holds).
    pub fn insert(&mut self, object: KernelObject, rights: Rights) -> HandleId {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Entry { object, rights });
                return HandleId(i as u32);
            }
        }
        let id = self.slots.len() as u32;
        self.slots.push(Some(Entry { object, rights }));
        HandleId(id)
    }

    /// Look up a handle, requiring `required_rights` to be a subset of the
    /// entry's rights mask. The returned clone is valid for as long as the
    /// caller keeps it, which for the syscall path is the duration of that
    /// syscall; cloning it increments the underlying object's refcount.
    pub fn lookup(&self, id: HandleId, required_rights: Rights) -> KResult<KernelObject> {
        let entry = self
            .slots
            .get(id.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(KError::NoSuchObject)?;
        if !required_rights.is_subset_of(entry.rights) {
            return Err(KError::RightsDenied);
        }
        Ok(entry.object.clone())
    }

    /// Look up without a rights check, for internal bookkeeping callers
    /// (e.g. reading the rights mask itself for `object_get_info`).
    pub fn lookup_any(&self, id: HandleId) -> KResult<(KernelObject, Rights)> {
        let entry = self
            .slots
            .get(id.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(KError::NoSuchObject)?;
        Ok((entry.object.clone(), entry.rights))
    }

    /// Remove a handle, decrementing the object's refcount exactly once
    /// (the slot's `Arc` is dropped).
    pub fn close(&mut self, id: HandleId) -> KResult<()> {
        let slot = self
            .slots
            .get_mut(id.0 as usize)
            .ok_or(KError::NoSuchObject)?;
        if slot.take().is_none() {
            return Err(KError::NoSuchObject);
        }
        Ok(())
    }

    /// Duplicate a handle. `new_rights`, if given, must be a subset of the
    /// existing rights (duplication never elevates); if omitted, the
    /// existing rights are carried over unchanged.
    pub fn duplicate(&mut self, id: HandleId, new_rights: Option<Rights>) -> KResult<HandleId> {
        let (object, rights) = self.lookup_any(id)?;
        if !rights.contains(Rights::DUPLICATE) {
            return Err(KError::RightsDenied);
        }
        let rights = match new_rights {
            Some(r) if r.is_subset_of(rights) => r,
            Some(_) => return Err(KError::InvalidArgument),
            None => rights,
        };
        Ok(self.insert(object, rights))
    }

    /// Remove a handle and return its object + rights without dropping the
    /// reference — used by channel `send` to detach a handle from the
    /// sender's table before the object moves into the message.
    pub fn take(&mut self, id: HandleId, required_rights: Rights) -> KResult<(KernelObject, Rights)> {
        let entry = self
            .slots
            .get_mut(id.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(KError::NoSuchObject)?;
        if !required_rights.is_subset_of(entry.rights) {
            return Err(KError::RightsDenied);
        }
        let entry = self.slots[id.0 as usize].take().unwrap();
        Ok((entry.object, entry.rights))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn dummy_object() -> KernelObject {
        KernelObject::Job(Job::new())
    }

    #[test]
    fn insert_reuses_lowest_free_slot() {
        let mut table = HandleTable::new();
        let h0 = table.insert(dummy_object(), Rights::ALL);
        let h1 = table.insert(dummy_object(), Rights::ALL);
        table.close(h0).unwrap();
        let h2 = table.insert(dummy_object(), Rights::ALL);
        assert_eq!(h2, h0);
        assert_ne!(h1, h2);
    }

    #[test]
    fn lookup_enforces_rights() {
        let mut table = HandleTable::new();
        let h = table.insert(dummy_object(), Rights::READ);
        assert!(table.lookup(h, Rights::READ).is_ok());
        assert!(matches!(
            table.lookup(h, Rights::WRITE),
            Err(KError::RightsDenied)
        ));
    }

    #[test]
    fn duplicate_cannot_elevate_rights() {
        let mut table = HandleTable::new();
        let h = table.insert(dummy_object(), Rights::READ.or(Rights::DUPLICATE));
        assert!(table
            .duplicate(h, Some(Rights::READ.or(Rights::WRITE)))
            .is_err());
        let h2 = table.duplicate(h, Some(Rights::READ)).unwrap();
        assert!(table.lookup(h2, Rights::READ).is_ok());
    }

    #[test]
    fn close_is_single_use() {
        let mut table = HandleTable::new();
        let h = table.insert(dummy_object(), Rights::ALL);
        table.close(h).unwrap();
        assert!(table.close(h).is_err());
    }
}
