//! The global path-keyed namespace.
//!
//! A single directory shared by the whole system (there is one kernel, so
//! there is one namespace). Paths are compared literally; the only
//! validation is rejecting empty components, reusing the canonical-path
//! check already written for the ABI layer. Registration fails if the path
//! is already bound; lookup hands back a fresh reference (an `Arc` clone,
//! i.e. `object_ref`).

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spinning_top::RwSpinlock;

use crate::error::{KError, KResult};
use crate::object::KernelObject;

static NAMESPACE: RwSpinlock<Option<BTreeMap<String, KernelObject>>> = RwSpinlock::new(None);

/// Initialize the namespace. Must run once, before any other kernel
/// subsystem tries to register or look anything up.
pub fn init() {
    *NAMESPACE.write() = Some(BTreeMap::new());
}

fn validate_path(path: &str) -> KResult<()> {
    if panda_abi::path::is_canonical(path) {
        Ok(())
    } else {
        Err(KError::InvalidArgument)
    }
}

/// Publish `object` under `path`. Rejected if the path is already bound.
pub fn register(path: &str, object: KernelObject) -> KResult<()> {
    validate_path(path)?;
    let mut guard = NAMESPACE.write();
    let map = guard.as_mut().expect("namespace not initialized");
    if map.contains_key(path) {
        return Err(KError::NameExists);
    }
    map.insert(path.to_string(), object);
    Ok(())
}

/// Remove a binding, returning the object that was there.
pub fn unregister(path: &str) -> KResult<KernelObject> {
    let mut guard = NAMESPACE.write();
    let map = guard.as_mut().expect("namespace not initialized");
    map.remove(path).ok_or(KError::NameNotFound)
}

/// Look up a path. Returns a new reference (refcount of the returned
/// object is incremented relative to what it was before the call, since
/// this clones the entry held in the namespace map).
pub fn lookup(path: &str) -> KResult<KernelObject> {
    let guard = NAMESPACE.read();
    let map = guard.as_ref().expect("namespace not initialized");
    map.get(path).cloned().ok_or(KError::NameNotFound)
}

/// Stateless cursor iteration: returns up to `max` entries starting at
/// `cursor`, plus the cursor to pass on the next call. Ordering is
/// insertion-stable only insofar as `BTreeMap`'s key order happens to be;
/// the spec only promises it's *some* stable order across calls as long as
/// the namespace isn't mutated concurrently.
pub fn list(cursor: usize, max: usize) -> (Vec<(String, KernelObject)>, usize) {
    let guard = NAMESPACE.read();
    let map = guard.as_ref().expect("namespace not initialized");
    let entries: Vec<_> = map
        .iter()
        .skip(cursor)
        .take(max)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let next_cursor = cursor + entries.len();
    (entries, next_cursor)
}

/// A virtual directory object exposing a subtree of the global namespace,
/// letting higher-level code mount one namespace region under another
/// (`ns_create_dir(prefix)`).
pub struct NsDir {
    prefix: String,
}

impl NsDir {
    pub fn new(prefix: &str) -> Arc<NsDir> {
        Arc::new(NsDir {
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn lookup(&self, name: &str) -> KResult<KernelObject> {
        let full = alloc::format!("{}/{}", self.prefix, name);
        lookup(&full)
    }

    pub fn readdir(&self, cursor: usize, max: usize) -> (Vec<(String, KernelObject)>, usize) {
        let guard = NAMESPACE.read();
        let map = guard.as_ref().expect("namespace not initialized");
        let scoped_prefix = alloc::format!("{}/", self.prefix);
        let matches: Vec<_> = map
            .iter()
            .filter(|(k, _)| k.starts_with(&scoped_prefix))
            .skip(cursor)
            .take(max)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let next_cursor = cursor + matches.len();
        (matches, next_cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn dummy() -> KernelObject {
        KernelObject::Job(Job::new())
    }

    #[test]
    fn register_rejects_collision() {
        init();
        register("/x", dummy()).unwrap();
        assert!(matches!(register("/x", dummy()), Err(KError::NameExists)));
        let looked_up = lookup("/x").unwrap();
        assert_eq!(looked_up.ref_count(), 2);
    }

    #[test]
    fn unregister_then_lookup_fails() {
        init();
        register("/y", dummy()).unwrap();
        unregister("/y").unwrap();
        assert!(matches!(lookup("/y"), Err(KError::NameNotFound)));
    }
}
