//! Process/thread operations: spawn, pid, and the tick counter.
//!
//! Grounded on `process::Process::from_elf_data`, `job::root`, and
//! `channel::Channel`. `spawn`'s `path_ptr` names a `Vmo` published in the
//! namespace (the same way `ns_register` lets any process advertise
//! anything there) holding a raw ELF image; there is no separate file
//! abstraction to load one through. Argv is handed to the child the same
//! way any other startup data would be: packed into the first message
//! waiting on its `WellKnownHandle::PARENT` channel, laid out per
//! `StartupMessageHeader`'s documented wire format.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use panda_abi::{Rights, StartupMessageHeader};

use crate::channel::Channel;
use crate::error::KError;
use crate::job;
use crate::namespace;
use crate::object::KernelObject;
use crate::process::Process;
use crate::scheduler;
use crate::syscall::user_ptr::{SyscallError, SyscallFuture, SyscallResult, UserAccess, UserSlice, WriteBack};
use crate::syscall::ready_result;

#[repr(C)]
#[derive(Clone, Copy)]
struct ArgvEntry {
    ptr: usize,
    len: usize,
}

fn encode_startup_message(args: &[String]) -> alloc::vec::Vec<u8> {
    let header = StartupMessageHeader {
        version: 1,
        arg_count: args.len() as u16,
        flags: 0,
    };
    let mut buf = alloc::vec::Vec::new();
    buf.extend_from_slice(unsafe {
        core::slice::from_raw_parts(
            &header as *const StartupMessageHeader as *const u8,
            core::mem::size_of::<StartupMessageHeader>(),
        )
    });
    for arg in args {
        buf.extend_from_slice(&(arg.len() as u16).to_ne_bytes());
    }
    for arg in args {
        buf.extend_from_slice(arg.as_bytes());
    }
    buf
}

pub fn spawn(
    ua: &UserAccess,
    process: &Arc<Process>,
    path_ptr: usize,
    path_len: usize,
    argc: usize,
    argv_ptr: usize,
    parent_channel_out_ptr: usize,
) -> Result<SyscallFuture, SyscallError> {
    let path = ua.read_str(path_ptr, path_len)?;

    let image = match namespace::lookup(&path) {
        Ok(object) => match object.as_vmo().cloned() {
            Some(vmo) => vmo,
            None => return Ok(ready_result(SyscallResult::err(KError::NotSupported.as_retval()))),
        },
        Err(e) => return Ok(ready_result(SyscallResult::err(e.as_retval()))),
    };
    let data = match image.read(0, image.size()) {
        Ok(d) => d,
        Err(e) => return Ok(ready_result(SyscallResult::err(e.as_retval()))),
    };

    let mut args: Vec<String> = Vec::with_capacity(argc);
    for i in 0..argc {
        let entry: ArgvEntry = ua.read_struct(argv_ptr + i * core::mem::size_of::<ArgvEntry>())?;
        args.push(ua.read_str(entry.ptr, entry.len)?);
    }

    let job = process.job().unwrap_or_else(job::root);
    let child = match Process::from_elf_data(&data, &job) {
        Ok(p) => p,
        Err(e) => return Ok(ready_result(SyscallResult::err(e.as_retval()))),
    };

    let (parent_end, child_end) = Channel::create_pair();
    child.set_parent_channel(child_end);
    let _ = parent_end.send(encode_startup_message(&args), Vec::new());

    scheduler::add_thread(&child);

    let pid = child.id().as_u64();
    let mut writeback = Vec::new();
    if parent_channel_out_ptr != 0 {
        let handle_id = process
            .handles()
            .lock()
            .insert(KernelObject::from(parent_end), Rights::ALL);
        writeback.push(WriteBack {
            data: handle_id.as_u64().to_ne_bytes().to_vec(),
            dst: UserSlice::new(parent_channel_out_ptr, core::mem::size_of::<u64>()),
        });
    }

    Ok(ready_result(SyscallResult {
        code: pid as isize,
        writeback,
    }))
}

pub fn get_pid(process: &Arc<Process>) -> Result<SyscallFuture, SyscallError> {
    Ok(ready_result(SyscallResult::ok(process.id().as_u64() as isize)))
}

pub fn get_ticks() -> Result<SyscallFuture, SyscallError> {
    Ok(ready_result(SyscallResult::ok(crate::time::uptime_ms() as isize)))
}
