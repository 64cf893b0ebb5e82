//! Syscall handling infrastructure.
//!
//! This module handles the system call interface between userspace and the
//! kernel. It provides:
//! - GDT/TSS setup for privilege transitions
//! - Syscall entry point (via SYSCALL/SYSRET)
//! - Dispatch to operation-specific handlers, one module per family in
//!   `panda_abi::Operation`

mod channel_ops;
mod entry;
pub mod gdt;
mod handle_ops;
mod ns_ops;
mod process_ops;
pub(crate) mod user_ptr;
mod vmo_ops;

use log::{debug, error, info};
use x86_64::VirtAddr;

use alloc::boxed::Box;
use alloc::sync::Arc;

use core::future::Future;
use core::task::Poll;

use spinning_top::Spinlock;

use panda_abi::{Operation, Rights, WellKnownHandle};

use crate::error::{KError, KResult};
use crate::handle::HandleId;
use crate::object::KernelObject;
use crate::process::Process;
use crate::scheduler;
use user_ptr::{SyscallError, SyscallFuture, SyscallResult, UserAccess};

/// Callee-saved registers that must be preserved across syscalls.
/// These are saved by `syscall_entry` and passed to `syscall_handler` for use
/// when a thread blocks and needs to restore full state on resume.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct CalleeSavedRegs {
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// A syscall future that returned `Pending`, stashed on its owning `Thread`
/// until the waker it was polled with marks the thread runnable again.
pub struct PendingSyscall {
    pub future: Spinlock<SyscallFuture>,
    pub callee_saved: CalleeSavedRegs,
}

impl PendingSyscall {
    pub fn new(future: SyscallFuture, callee_saved: CalleeSavedRegs) -> Self {
        Self {
            future: Spinlock::new(future),
            callee_saved,
        }
    }
}

/// Get the user code segment selector. Must be called after init().
pub fn user_code_selector() -> u16 {
    gdt::user_code_selector()
}

/// Initialize syscall infrastructure (GDT, TSS, MSRs, fault-trapped user copy).
pub fn init() {
    gdt::init();
    entry::init();
    user_ptr::init();
}

/// Resolve a raw syscall handle argument to the object it names.
///
/// `WellKnownHandle::PROCESS`/`PARENT` are recognized directly, before any
/// table lookup, since they're tagged with `ObjectType` values and ids that
/// a real `HandleTable` entry (a small sequential `HandleId`) never produces
/// — see `HandleId::from_u64`, which rejects anything above `u32::MAX`.
/// Well-known handles bypass the rights check entirely: they name objects
/// the process is always trusted to use in full.
pub(crate) fn resolve_handle(process: &Arc<Process>, raw: u64, required: Rights) -> KResult<KernelObject> {
    if raw == WellKnownHandle::PROCESS {
        return Ok(KernelObject::from(process.clone()));
    }
    if raw == WellKnownHandle::PARENT {
        let channel = process.parent_channel().ok_or(KError::NoSuchObject)?;
        return Ok(KernelObject::from(channel));
    }
    let id = HandleId::from_u64(raw).ok_or(KError::NoSuchObject)?;
    process.handles().lock().lookup(id, required)
}

/// Wrap an already-computed result as an immediately-ready future, for
/// handlers whose work never blocks (everything but the channel-recv family).
pub(crate) fn ready_result(result: SyscallResult) -> SyscallFuture {
    Box::pin(core::future::ready(result))
}

/// Main syscall handler called from `entry.rs`.
///
/// This is called from the naked `syscall_entry` function with all registers
/// saved. Diverging operations (`Yield`, `Exit`) never return here at all.
/// Every other operation builds a future, polls it once, and either returns
/// its result immediately or stashes it as a `PendingSyscall` and yields.
#[allow(clippy::too_many_arguments)]
extern "sysv64" fn syscall_handler(
    arg0: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
    code: usize,
    return_rip: usize,
    user_rsp: usize,
    callee_saved: *const CalleeSavedRegs,
) -> isize {
    // Disable interrupts for the entire syscall to prevent race conditions
    // with the preemption timer.
    let flags = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();

    let result = {
        debug!(
            "SYSCALL: code={code:#x}, args: {arg0:#x} {arg1:#x} {arg2:#x} {arg3:#x} {arg4:#x} {arg5:#x}"
        );

        if code != panda_abi::SYSCALL_SEND {
            panda_abi::ErrorCode::InvalidArgument.as_retval()
        } else {
            // Safety: callee_saved points to registers pushed by syscall_entry
            // on the kernel stack, valid for the duration of this call. Use
            // read_volatile so the copy happens before anything else touches
            // that stack slot.
            let callee_saved = unsafe { core::ptr::read_volatile(callee_saved) };
            let operation_code = arg1 as u32;

            // Phase 1: diverging operations that manipulate the scheduler
            // directly and never produce a value for userspace.
            match Operation::from_u32(operation_code) {
                Some(Operation::Yield) => unsafe {
                    scheduler::yield_current(
                        VirtAddr::new(return_rip as u64),
                        VirtAddr::new(user_rsp as u64),
                        callee_saved,
                    );
                },
                Some(Operation::Exit) => {
                    let process = scheduler::current_process();
                    info!("process {:?} exiting with code {}", process.id(), arg0 as i32);
                    process.info().set_exit_code(arg0 as i32);
                    scheduler::remove_current_thread();
                    unsafe { scheduler::exec_next_runnable() };
                }
                _ => {}
            }

            // Phase 2: build a future from the handler. UserAccess is
            // created here, while the syscalling process's page table is
            // still active, and cannot escape into any future (it's !Send).
            let ua = unsafe { user_ptr::UserAccess::new() };
            let process = scheduler::current_process();
            let future = build_future(&ua, &process, operation_code, arg0, arg2, arg3, arg4, arg5);
            drop(ua);

            // Phase 3: poll the future once and dispatch.
            poll_and_dispatch(future, return_rip, user_rsp, callee_saved)
        }
    };

    // Restore interrupt state before returning to userspace.
    if flags {
        x86_64::instructions::interrupts::enable();
    }

    result
}

/// Build a syscall future by dispatching to the appropriate handler.
///
/// Handlers that read from userspace receive `&UserAccess` to copy data in
/// before building their future. The `UserAccess` token is never captured in
/// any future — the compiler enforces this since it is `!Send`.
///
/// `arg0`/`arg2`/`arg3`/`arg4`/`arg5` are passed through positionally; `arg1`
/// (the operation discriminant) has already been consumed by the caller.
#[allow(clippy::too_many_arguments)]
fn build_future(
    ua: &UserAccess,
    process: &Arc<Process>,
    operation: u32,
    arg0: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> SyscallFuture {
    let result: Result<SyscallFuture, SyscallError> = match Operation::from_u32(operation) {
        Some(Operation::GetObj) => ns_ops::get_obj(ua, process, arg0 as u64, arg2, arg3, arg4 as u32),
        Some(Operation::HandleClose) => handle_ops::close(process, arg0 as u64),
        Some(Operation::HandleDup) => handle_ops::dup(process, arg0 as u64, arg2 as u32),
        Some(Operation::HandleRead) => handle_ops::read(process, arg0 as u64, arg2, arg3, arg4),
        Some(Operation::HandleWrite) => handle_ops::write(ua, process, arg0 as u64, arg2, arg3, arg4),
        Some(Operation::HandleSeek) => handle_ops::seek(),
        Some(Operation::ObjectGetInfo) => {
            handle_ops::get_info(process, arg0 as u64, arg2 as u32, arg3, arg4)
        }

        Some(Operation::NsRegister) => ns_ops::register(ua, process, arg0, arg2, arg3 as u64),
        Some(Operation::NsUnregister) => ns_ops::unregister(ua, arg0, arg2),
        Some(Operation::NsList) => ns_ops::list(ua, arg0, arg2, arg3),

        Some(Operation::VmoCreate) => vmo_ops::create(arg0, arg2 as u32),
        Some(Operation::VmoRead) => vmo_ops::read(process, arg0 as u64, arg2, arg3, arg4),
        Some(Operation::VmoWrite) => vmo_ops::write(ua, process, arg0 as u64, arg2, arg3, arg4),
        Some(Operation::VmoResize) => vmo_ops::resize(process, arg0 as u64, arg2),
        Some(Operation::VmoMap) => vmo_ops::map(process, arg0 as u64, arg2, arg3, arg4, arg5 as u32),
        Some(Operation::VmoUnmap) => vmo_ops::unmap(process, arg0, arg2),

        Some(Operation::ChannelCreate) => channel_ops::create(arg0),
        Some(Operation::ChannelSend) => {
            channel_ops::send(ua, process, arg0 as u64, arg2, arg3, arg4, arg5)
        }
        Some(Operation::ChannelRecv) => {
            channel_ops::recv(process, arg0 as u64, arg2, arg3, arg4 as u64, false, 0)
        }
        Some(Operation::ChannelTryRecv) => channel_ops::try_recv(process, arg0 as u64, arg2, arg3),
        Some(Operation::ChannelRecvMsg) => {
            channel_ops::recv(process, arg0 as u64, arg2, arg3, arg5 as u64, true, arg4)
        }

        Some(Operation::Spawn) => process_ops::spawn(ua, process, arg0, arg2, arg3, arg4, arg5),
        Some(Operation::GetPid) => process_ops::get_pid(process),
        Some(Operation::GetTicks) => process_ops::get_ticks(),

        // Yield and Exit diverge in Phase 1 and never reach this match.
        Some(Operation::Yield) | Some(Operation::Exit) => unreachable!("diverging op reached build_future"),

        None => {
            error!("Unknown operation code: {operation:#x}");
            Ok(ready_result(SyscallResult::err(
                panda_abi::ErrorCode::NotSupported.as_retval(),
            )))
        }
    };

    match result {
        Ok(future) => future,
        Err(e) => ready_result(SyscallResult::err(e.to_error_code().as_retval())),
    }
}

/// Poll a syscall future once. If ready, perform copy-out and return the
/// result code. If pending, store the future as a `PendingSyscall` and yield
/// to the scheduler.
///
/// When the future is `Pending`, the callee-saved registers are saved so
/// they can be correctly restored when the thread resumes (via
/// `return_from_deferred_syscall`). Without this, userspace would see
/// corrupted rbx/rbp/r12-r15 after a blocking syscall — a bug that only
/// manifests in release builds, where the optimizer keeps values in
/// callee-saved registers across syscalls.
fn poll_and_dispatch(
    mut future: SyscallFuture,
    return_rip: usize,
    user_rsp: usize,
    callee_saved: CalleeSavedRegs,
) -> isize {
    let tid = scheduler::current_thread_id();
    let waker = scheduler::ThreadWaker::into_waker(tid);
    let mut cx = core::task::Context::from_waker(&waker);

    match future.as_mut().poll(&mut cx) {
        Poll::Ready(result) => {
            if !result.writeback.is_empty() {
                let ua = unsafe { user_ptr::UserAccess::new() };
                for wb in &result.writeback {
                    let _ = ua.write(wb.dst, &wb.data);
                }
            }
            result.code
        }
        Poll::Pending => {
            scheduler::current_thread().set_pending_syscall(PendingSyscall::new(future, callee_saved));
            unsafe {
                scheduler::yield_current(
                    VirtAddr::new(return_rip as u64),
                    VirtAddr::new(user_rsp as u64),
                    callee_saved,
                );
            }
        }
    }
}
