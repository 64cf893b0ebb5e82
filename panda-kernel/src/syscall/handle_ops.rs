//! Generic handle operations: close, duplicate, vtable read/write/seek, and
//! type-specific info readout.
//!
//! `HandleRead`/`HandleWrite` dispatch to the same VMO codepath `VmoRead`/
//! `VmoWrite` use when given a `Vmo`-typed handle (`NotSupported` for every
//! other object kind — nothing else in this tree exposes a byte-addressable
//! vtable). `HandleSeek` is unconditionally `NotSupported`: no object kind
//! here keeps a stateful read/write position (there is no `File` object
//! wired up, only `Vmo`, whose operations are already offset-addressed).

use alloc::sync::Arc;

use panda_abi::Rights;

use crate::error::KError;
use crate::handle::HandleId;
use crate::object::KernelObject;
use crate::process::Process;
use crate::syscall::user_ptr::{SyscallError, SyscallFuture, SyscallResult, UserAccess};
use crate::syscall::{ready_result, resolve_handle, vmo_ops};

/// Decode a raw handle argument into a table slot, rejecting the well-known
/// sentinels outright — closing or duplicating an implicit handle like
/// `WellKnownHandle::PROCESS` makes no sense, since there is no table entry
/// backing it.
fn table_handle(raw: u64) -> Result<HandleId, SyscallError> {
    HandleId::from_u64(raw).ok_or(SyscallError::InvalidHandle)
}

pub fn close(process: &Arc<Process>, h: u64) -> Result<SyscallFuture, SyscallError> {
    let id = table_handle(h)?;
    let result = match process.handles().lock().close(id) {
        Ok(()) => SyscallResult::ok(0),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

pub fn dup(process: &Arc<Process>, h: u64, new_rights: u32) -> Result<SyscallFuture, SyscallError> {
    let id = table_handle(h)?;
    let requested = Rights(new_rights);
    let result = match process.handles().lock().duplicate(id, Some(requested)) {
        Ok(new_id) => SyscallResult::ok(new_id.as_u64() as isize),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

/// Shared by `Operation::HandleRead` (any handle) and `vmo_ops::read`'s own
/// `Operation::VmoRead` entry point.
pub fn read(
    process: &Arc<Process>,
    h: u64,
    buf_ptr: usize,
    buf_len: usize,
    offset: usize,
) -> Result<SyscallFuture, SyscallError> {
    let object = resolve_handle(process, h, Rights::READ).map_err(|_| SyscallError::InvalidHandle)?;
    match &object {
        KernelObject::Vmo(_) => vmo_ops::read(process, h, buf_ptr, buf_len, offset),
        _ => Ok(ready_result(SyscallResult::err(KError::NotSupported.as_retval()))),
    }
}

pub fn write(
    ua: &UserAccess,
    process: &Arc<Process>,
    h: u64,
    buf_ptr: usize,
    buf_len: usize,
    offset: usize,
) -> Result<SyscallFuture, SyscallError> {
    let object = resolve_handle(process, h, Rights::WRITE).map_err(|_| SyscallError::InvalidHandle)?;
    match &object {
        KernelObject::Vmo(_) => vmo_ops::write(ua, process, h, buf_ptr, buf_len, offset),
        _ => Ok(ready_result(SyscallResult::err(KError::NotSupported.as_retval()))),
    }
}

/// No object kind in this tree maintains a stateful position, so this is
/// always `NotSupported`; kept as its own operation (rather than folded into
/// `HandleRead`) because the catalogue documents `lseek`-style semantics a
/// future `File` object kind would want.
pub fn seek() -> Result<SyscallFuture, SyscallError> {
    Ok(ready_result(SyscallResult::err(KError::NotSupported.as_retval())))
}

/// Fixed-shape info readout, ignoring `topic` — every object kind here
/// exposes the same two facts (`object_type`, `ref_count`), so there is no
/// per-topic variation to dispatch on yet.
#[repr(C)]
#[derive(Clone, Copy)]
struct BasicInfo {
    object_type: u8,
    _pad: [u8; 3],
    ref_count: u32,
}

pub fn get_info(
    process: &Arc<Process>,
    h: u64,
    _topic: u32,
    buf_ptr: usize,
    buf_len: usize,
) -> Result<SyscallFuture, SyscallError> {
    let object = resolve_handle(process, h, Rights::GET_INFO).map_err(|_| SyscallError::InvalidHandle)?;
    let info = BasicInfo {
        object_type: object.object_type() as u8,
        _pad: [0; 3],
        ref_count: object.ref_count() as u32,
    };
    let dst = crate::syscall::user_ptr::UserSlice::new(buf_ptr, buf_len);
    Ok(ready_result(SyscallResult::write_back_struct(
        core::mem::size_of::<BasicInfo>() as isize,
        &info,
        dst,
    )))
}
