//! VMO operations: create, read, write, resize, map, unmap.
//!
//! Grounded on `vmo::Vmo`. None of these block — a VMO read/write/resize
//! touches only already-resident kernel state (its own `pages` array), so
//! every handler here is synchronous and wrapped in an immediately-ready
//! future, same as the rest of the non-channel syscall surface.

use alloc::sync::Arc;
use x86_64::VirtAddr;

use panda_abi::{Rights, VmoFlags};

use crate::error::KError;
use crate::object::KernelObject;
use crate::process::Process;
use crate::syscall::user_ptr::{SyscallError, SyscallFuture, SyscallResult, UserAccess, UserSlice};
use crate::syscall::{ready_result, resolve_handle};
use crate::vmo::Vmo;

pub fn create(size: usize, flags: u32) -> Result<SyscallFuture, SyscallError> {
    let process = crate::scheduler::current_process();
    let vmo = Vmo::create(size, VmoFlags(flags));
    let id = process
        .handles()
        .lock()
        .insert(KernelObject::from(vmo), Rights::ALL);
    Ok(ready_result(SyscallResult::ok(id.as_u64() as isize)))
}

fn vmo_handle(process: &Arc<Process>, h: u64, required: Rights) -> Result<Arc<Vmo>, SyscallError> {
    let object = resolve_handle(process, h, required).map_err(|_| SyscallError::InvalidHandle)?;
    object.as_vmo().cloned().ok_or(SyscallError::InvalidHandle)
}

/// Shared by `Operation::VmoRead` and the generic `Operation::HandleRead`
/// dispatched onto a VMO-typed handle.
pub fn read(
    process: &Arc<Process>,
    h: u64,
    buf_ptr: usize,
    buf_len: usize,
    offset: usize,
) -> Result<SyscallFuture, SyscallError> {
    let vmo = vmo_handle(process, h, Rights::READ)?;
    let result = match vmo.read(offset, buf_len) {
        Ok(bytes) => {
            let n = bytes.len();
            SyscallResult::write_back(n as isize, bytes, UserSlice::new(buf_ptr, buf_len))
        }
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

/// Shared by `Operation::VmoWrite` and `Operation::HandleWrite`.
pub fn write(
    ua: &UserAccess,
    process: &Arc<Process>,
    h: u64,
    buf_ptr: usize,
    buf_len: usize,
    offset: usize,
) -> Result<SyscallFuture, SyscallError> {
    let vmo = vmo_handle(process, h, Rights::WRITE)?;
    let data = ua.read(UserSlice::new(buf_ptr, buf_len))?;
    let result = match vmo.write(offset, &data) {
        Ok(n) => SyscallResult::ok(n as isize),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

pub fn resize(process: &Arc<Process>, h: u64, new_size: usize) -> Result<SyscallFuture, SyscallError> {
    let vmo = vmo_handle(process, h, Rights::WRITE)?;
    let result = match vmo.resize(new_size) {
        Ok(()) => SyscallResult::ok(0),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

pub fn map(
    process: &Arc<Process>,
    h: u64,
    vaddr_hint: usize,
    offset: usize,
    len: usize,
    rights: u32,
) -> Result<SyscallFuture, SyscallError> {
    let vmo = vmo_handle(process, h, Rights::MAP)?;
    let rights = Rights(rights).intersect(Rights::ALL);
    let result = match vmo.map(process, vaddr_hint, offset, len, rights) {
        Ok(vaddr) => SyscallResult::ok(vaddr.as_u64() as isize),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

/// `vmo_unmap` names only an address and length (mirroring `munmap`), not a
/// VMO handle — the owning `Vmo` is recovered from the process's own
/// mapping bookkeeping via `Process::vmo_at`.
pub fn unmap(process: &Arc<Process>, vaddr: usize, len: usize) -> Result<SyscallFuture, SyscallError> {
    let Some(vmo) = process.vmo_at(VirtAddr::new(vaddr as u64)) else {
        return Ok(ready_result(SyscallResult::err(KError::InvalidArgument.as_retval())));
    };
    let result = match vmo.unmap(process, VirtAddr::new(vaddr as u64), len) {
        Ok(()) => SyscallResult::ok(0),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}
