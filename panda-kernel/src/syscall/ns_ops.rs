//! Namespace operations: publish, remove, look up, and iterate entries of
//! the global path-keyed namespace.
//!
//! Grounded on `namespace::{register, unregister, lookup, list}` and
//! `NsDir::{lookup, readdir}`. `get_obj` resolves through the global root
//! when `parent_h` names the root namespace (`WellKnownHandle::ROOT`, or the
//! `INVALID_HANDLE` sentinel as an accepted alias for "no parent, absolute
//! path"); any other `parent_h` must decode to a live `NsDir` handle, and the
//! lookup is scoped under that directory's prefix.

use alloc::sync::Arc;
use alloc::vec::Vec;

use panda_abi::{INVALID_HANDLE, NsEntry, Rights, WellKnownHandle};

use crate::error::{KError, KResult};
use crate::namespace;
use crate::object::KernelObject;
use crate::process::Process;
use crate::syscall::user_ptr::{SyscallError, SyscallFuture, SyscallResult, UserAccess, UserSlice, WriteBack};
use crate::syscall::{ready_result, resolve_handle};

pub fn get_obj(
    ua: &UserAccess,
    process: &Arc<Process>,
    parent_h: u64,
    path_ptr: usize,
    path_len: usize,
    rights: u32,
) -> Result<SyscallFuture, SyscallError> {
    let path = ua.read_str(path_ptr, path_len)?;
    let requested = Rights(rights).intersect(Rights::ALL);

    let looked_up: KResult<KernelObject> = if parent_h == WellKnownHandle::ROOT || parent_h == INVALID_HANDLE {
        namespace::lookup(&path)
    } else {
        resolve_handle(process, parent_h, Rights::NONE)
            .and_then(|parent| parent.as_ns_dir().cloned().ok_or(KError::NotSupported))
            .and_then(|dir| dir.lookup(&path))
    };

    let result = match looked_up {
        Ok(object) => {
            let id = process.handles().lock().insert(object, requested);
            SyscallResult::ok(id.as_u64() as isize)
        }
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

pub fn register(
    ua: &UserAccess,
    process: &Arc<Process>,
    path_ptr: usize,
    path_len: usize,
    h: u64,
) -> Result<SyscallFuture, SyscallError> {
    let path = ua.read_str(path_ptr, path_len)?;
    let object = resolve_handle(process, h, Rights::NONE).map_err(|_| SyscallError::InvalidHandle)?;
    let result = match namespace::register(&path, object) {
        Ok(()) => SyscallResult::ok(0),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

pub fn unregister(ua: &UserAccess, path_ptr: usize, path_len: usize) -> Result<SyscallFuture, SyscallError> {
    let path = ua.read_str(path_ptr, path_len)?;
    let result = match namespace::unregister(&path) {
        Ok(_object) => SyscallResult::ok(0),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

pub fn list(
    ua: &UserAccess,
    entries_ptr: usize,
    count: usize,
    cursor_ptr: usize,
) -> Result<SyscallFuture, SyscallError> {
    let cursor: u64 = ua.read_struct(cursor_ptr)?;
    let (entries, next_cursor) = namespace::list(cursor as usize, count);

    let mut wire: Vec<NsEntry> = Vec::with_capacity(entries.len());
    for (name, object) in &entries {
        let mut name_buf = [0u8; NsEntry::NAME_MAX];
        let len = name.len().min(NsEntry::NAME_MAX);
        name_buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        wire.push(NsEntry {
            name_len: len as u8,
            object_type: object.object_type() as u8,
            name: name_buf,
        });
    }

    let entries_bytes = unsafe {
        core::slice::from_raw_parts(wire.as_ptr() as *const u8, core::mem::size_of_val(wire.as_slice()))
    }
    .to_vec();
    let cursor_bytes = (next_cursor as u64).to_ne_bytes().to_vec();

    let writeback = alloc::vec![
        WriteBack {
            data: entries_bytes,
            dst: UserSlice::new(entries_ptr, core::mem::size_of::<NsEntry>() * entries.len()),
        },
        WriteBack {
            data: cursor_bytes,
            dst: UserSlice::new(cursor_ptr, core::mem::size_of::<u64>()),
        },
    ];

    Ok(ready_result(SyscallResult::write_back_many(
        entries.len() as isize,
        writeback,
    )))
}
