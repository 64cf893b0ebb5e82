//! Channel operations: create, send, and the two receive variants.
//!
//! Grounded on `channel::Channel`. `recv`/`recv_msg` share a single
//! `RecvFuture`: both poll the same `try_recv`/`park_receiver` pair, the
//! only difference being whether the transferred-handle out-array is
//! populated and inserted into the caller's handle table. `ChannelSend`'s
//! catalogue entry carries no `NONBLOCK` flag or deadline argument, so a
//! full queue is reported synchronously as `WouldBlock` rather than parked
//! on — there is nothing for the caller to block against.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use panda_abi::{INVALID_HANDLE, MAX_MESSAGE_HANDLES, Rights};

use crate::channel::{Channel, Message};
use crate::error::KError;
use crate::handle::HandleId;
use crate::object::KernelObject;
use crate::process::Process;
use crate::scheduler;
use crate::syscall::user_ptr::{SyscallError, SyscallFuture, SyscallResult, UserAccess, UserSlice, WriteBack};
use crate::syscall::{ready_result, resolve_handle};

fn channel_handle(process: &Arc<Process>, h: u64, required: Rights) -> Result<Arc<Channel>, SyscallError> {
    let object = resolve_handle(process, h, required).map_err(|_| SyscallError::InvalidHandle)?;
    object.as_channel().cloned().ok_or(SyscallError::InvalidHandle)
}

pub fn create(out_handles_ptr: usize) -> Result<SyscallFuture, SyscallError> {
    let process = scheduler::current_process();
    let (a, b) = Channel::create_pair();
    let ha = process
        .handles()
        .lock()
        .insert(KernelObject::from(a), Rights::ALL);
    let hb = process
        .handles()
        .lock()
        .insert(KernelObject::from(b), Rights::ALL);

    let mut bytes = Vec::with_capacity(16);
    bytes.extend_from_slice(&ha.as_u64().to_ne_bytes());
    bytes.extend_from_slice(&hb.as_u64().to_ne_bytes());

    Ok(ready_result(SyscallResult::write_back(
        0,
        bytes,
        UserSlice::new(out_handles_ptr, 16),
    )))
}

pub fn send(
    ua: &UserAccess,
    process: &Arc<Process>,
    h: u64,
    buf_ptr: usize,
    buf_len: usize,
    handles_ptr: usize,
    handles_len: usize,
) -> Result<SyscallFuture, SyscallError> {
    let channel = channel_handle(process, h, Rights::WRITE)?;
    if channel.would_block_send() {
        return Ok(ready_result(SyscallResult::err(KError::WouldBlock.as_retval())));
    }
    // `send` only ever fails with `AlreadyClosed`; check it before taking
    // any handles off the sender, so a failed send never detaches them.
    if channel.peer_closed() {
        return Ok(ready_result(SyscallResult::err(KError::AlreadyClosed.as_retval())));
    }

    let bytes = ua.read(UserSlice::new(buf_ptr, buf_len))?;

    let mut handles = Vec::with_capacity(handles_len);
    for i in 0..handles_len {
        let raw: u64 = ua.read_struct(handles_ptr + i * core::mem::size_of::<u64>())?;
        let id = HandleId::from_u64(raw).ok_or(SyscallError::InvalidHandle)?;
        let entry = process
            .handles()
            .lock()
            .take(id, Rights::TRANSFER)
            .map_err(|_| SyscallError::InvalidHandle)?;
        handles.push(entry);
    }

    let result = match channel.send(bytes, handles) {
        Ok(()) => SyscallResult::ok(0),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

pub fn try_recv(process: &Arc<Process>, h: u64, buf_ptr: usize, buf_len: usize) -> Result<SyscallFuture, SyscallError> {
    let channel = channel_handle(process, h, Rights::READ)?;
    let result = match channel.try_recv(buf_len) {
        Ok(Some(msg)) => build_recv_result(msg, buf_ptr, false, 0, process),
        Ok(None) => SyscallResult::err(KError::WouldBlock.as_retval()),
        Err(e) => SyscallResult::err(e.as_retval()),
    };
    Ok(ready_result(result))
}

/// Shared entry point for `Operation::ChannelRecv` (`want_handles == false`,
/// `handles_out_ptr` unused) and `Operation::ChannelRecvMsg`. `deadline` of
/// `0` means "block indefinitely", matching `crate::time::uptime_ms()`'s
/// own "no time has passed yet" zero value at boot.
pub fn recv(
    process: &Arc<Process>,
    h: u64,
    buf_ptr: usize,
    buf_len: usize,
    deadline: u64,
    want_handles: bool,
    handles_out_ptr: usize,
) -> Result<SyscallFuture, SyscallError> {
    let channel = channel_handle(process, h, Rights::READ)?;
    Ok(Box::pin(RecvFuture {
        channel,
        process: process.clone(),
        buf_ptr,
        buf_len,
        deadline,
        want_handles,
        handles_out_ptr,
        parked: false,
    }))
}

struct RecvFuture {
    channel: Arc<Channel>,
    process: Arc<Process>,
    buf_ptr: usize,
    buf_len: usize,
    deadline: u64,
    want_handles: bool,
    handles_out_ptr: usize,
    parked: bool,
}

impl RecvFuture {
    fn unpark(&mut self) {
        if self.parked {
            let tid = scheduler::current_thread_id();
            self.channel.unpark_receiver(tid);
            scheduler::cancel_current_deadline();
            self.parked = false;
        }
    }
}

impl Future for RecvFuture {
    type Output = SyscallResult;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<SyscallResult> {
        match self.channel.try_recv(self.buf_len) {
            Ok(Some(msg)) => {
                self.unpark();
                let process = self.process.clone();
                Poll::Ready(build_recv_result(
                    msg,
                    self.buf_ptr,
                    self.want_handles,
                    self.handles_out_ptr,
                    &process,
                ))
            }
            Err(e) => {
                self.unpark();
                Poll::Ready(SyscallResult::err(e.as_retval()))
            }
            Ok(None) => {
                if self.deadline != 0 && crate::time::uptime_ms() >= self.deadline {
                    self.unpark();
                    return Poll::Ready(SyscallResult::err(KError::TimedOut.as_retval()));
                }
                if !self.parked {
                    let tid = scheduler::current_thread_id();
                    self.channel.park_receiver(tid);
                    if self.deadline != 0 {
                        scheduler::register_current_deadline(self.deadline);
                    }
                    self.parked = true;
                }
                Poll::Pending
            }
        }
    }
}

/// `msg` is guaranteed by `Channel::try_recv` to already fit in the
/// caller's buffer — truncation is handled before dequeuing, further up.
fn build_recv_result(
    msg: Message,
    buf_ptr: usize,
    want_handles: bool,
    handles_out_ptr: usize,
    process: &Arc<Process>,
) -> SyscallResult {
    let n = msg.bytes.len();

    let mut writeback = alloc::vec![WriteBack {
        data: msg.bytes,
        dst: UserSlice::new(buf_ptr, n),
    }];

    if want_handles {
        let mut slots: Vec<u64> = Vec::with_capacity(MAX_MESSAGE_HANDLES);
        for (object, rights) in msg.handles {
            if slots.len() >= MAX_MESSAGE_HANDLES {
                break;
            }
            let id = process.handles().lock().insert(object, rights);
            slots.push(id.as_u64());
        }
        while slots.len() < MAX_MESSAGE_HANDLES {
            slots.push(INVALID_HANDLE);
        }
        let mut bytes = Vec::with_capacity(MAX_MESSAGE_HANDLES * core::mem::size_of::<u64>());
        for slot in slots {
            bytes.extend_from_slice(&slot.to_ne_bytes());
        }
        writeback.push(WriteBack {
            data: bytes,
            dst: UserSlice::new(handles_out_ptr, MAX_MESSAGE_HANDLES * core::mem::size_of::<u64>()),
        });
    }

    SyscallResult::write_back_many(n as isize, writeback)
}
