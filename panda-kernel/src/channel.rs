//! IPC channels: bidirectional, datagram-preserving message queues.
//!
//! Grounded on the earlier `resource::channel::ChannelEndpoint`/
//! `ChannelShared`/`ChannelHalf` split (a shared struct holding one FIFO per
//! direction, each endpoint just remembering which side it is), extended so
//! a message carries transferred handles alongside its byte payload and
//! wired to a per-direction [`WaitQueue`] instead of the single-waiter
//! `Waker` (more than one thread can now be blocked in `recv`).

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spinning_top::Spinlock;

use panda_abi::{DEFAULT_QUEUE_CAPACITY, Rights};

use crate::error::{KError, KResult};
use crate::object::KernelObject;
use crate::thread::ThreadId;
use crate::wait_queue::WaitQueue;

/// A single enqueued message: bytes plus any handles transferred with it.
/// Owned end-to-end by the queue entry (see §9: freed on peer-close drain
/// if never dequeued, object refs released along with it).
pub struct Message {
    pub bytes: Vec<u8>,
    pub handles: Vec<(KernelObject, Rights)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

struct Half {
    queue: VecDeque<Message>,
    wait_queue: WaitQueue,
}

impl Half {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            wait_queue: WaitQueue::new(),
        }
    }
}

struct Shared {
    a_closed: AtomicBool,
    b_closed: AtomicBool,
    /// Messages sent from A, read by B.
    to_b: Spinlock<Half>,
    /// Messages sent from B, read by A.
    to_a: Spinlock<Half>,
}

/// One endpoint (one half) of a channel.
pub struct Channel {
    side: Side,
    shared: Arc<Shared>,
}

impl Channel {
    pub fn create_pair() -> (Arc<Channel>, Arc<Channel>) {
        let shared = Arc::new(Shared {
            a_closed: AtomicBool::new(false),
            b_closed: AtomicBool::new(false),
            to_b: Spinlock::new(Half::new()),
            to_a: Spinlock::new(Half::new()),
        });
        (
            Arc::new(Channel {
                side: Side::A,
                shared: shared.clone(),
            }),
            Arc::new(Channel {
                side: Side::B,
                shared,
            }),
        )
    }

    fn write_half(&self) -> &Spinlock<Half> {
        match self.side {
            Side::A => &self.shared.to_b,
            Side::B => &self.shared.to_a,
        }
    }

    fn read_half(&self) -> &Spinlock<Half> {
        match self.side {
            Side::A => &self.shared.to_a,
            Side::B => &self.shared.to_b,
        }
    }

    /// True if the peer has closed its end, meaning `send` would fail with
    /// `AlreadyClosed`. Exposed so callers can check before committing to
    /// work (e.g. detaching handles from a sender's table) that only makes
    /// sense if the send is actually going to succeed.
    pub fn peer_closed(&self) -> bool {
        match self.side {
            Side::A => self.shared.b_closed.load(Ordering::Acquire),
            Side::B => self.shared.a_closed.load(Ordering::Acquire),
        }
    }

    fn mark_self_closed(&self) {
        match self.side {
            Side::A => self.shared.a_closed.store(true, Ordering::Release),
            Side::B => self.shared.b_closed.store(true, Ordering::Release),
        }
    }

    /// `capacity` is the queue bound past which `send` would need to block;
    /// the source only bounds queues implicitly via memory pressure, but we
    /// keep `DEFAULT_QUEUE_CAPACITY` as the house default the same way the
    /// earlier `ChannelShared` did, reported here as a would-block rather
    /// than a hard failure.
    pub fn would_block_send(&self) -> bool {
        self.write_half().lock().queue.len() >= DEFAULT_QUEUE_CAPACITY
    }

    pub fn send(&self, bytes: Vec<u8>, handles: Vec<(KernelObject, Rights)>) -> KResult<()> {
        if self.peer_closed() {
            return Err(KError::AlreadyClosed);
        }
        let mut half = self.write_half().lock();
        half.queue.push_back(Message { bytes, handles });
        let waiter = half.wait_queue.wake_one();
        drop(half);
        if let Some(tid) = waiter {
            crate::scheduler::wake_thread(tid);
        }
        Ok(())
    }

    /// Non-blocking receive. Returns `Ok(None)` if empty and the peer is
    /// still open; `Err(EndOfStream)` if empty and the peer has closed;
    /// `Err(Truncated)` if the head message doesn't fit in `buf_len` bytes
    /// — in that case the message is left enqueued rather than dequeued,
    /// since a caller that can't read it shouldn't lose it.
    pub fn try_recv(&self, buf_len: usize) -> KResult<Option<Message>> {
        let mut half = self.read_half().lock();
        match half.queue.front() {
            Some(msg) if msg.bytes.len() > buf_len => Err(KError::Truncated),
            Some(_) => Ok(half.queue.pop_front()),
            None if self.peer_closed() => Err(KError::EndOfStream),
            None => Ok(None),
        }
    }

    /// Peek whether `recv` would return immediately (data present, or
    /// end-of-stream to report). Used by the blocking-recv future to
    /// decide whether to park.
    pub fn recv_ready(&self) -> bool {
        let half = self.read_half().lock();
        !half.queue.is_empty() || self.peer_closed()
    }

    /// Park `tid` on this channel's read wait queue. The caller must have
    /// already moved the thread to BLOCKED under the same lock ordering
    /// used elsewhere (object lock held across the state transition) to
    /// avoid a lost wakeup between the `recv_ready` check and parking.
    pub fn park_receiver(&self, tid: ThreadId) {
        self.read_half().lock().wait_queue.enqueue(tid);
    }

    pub fn unpark_receiver(&self, tid: ThreadId) {
        self.read_half().lock().wait_queue.remove(tid);
    }

    pub fn close(&self) {
        self.mark_self_closed();
        let waiters = self.write_half().lock().wait_queue.wake_all();
        for tid in waiters {
            crate::scheduler::wake_thread(tid);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_round_trips_bytes() {
        let (a, b) = Channel::create_pair();
        a.send(alloc::vec![1, 2, 3], Vec::new()).unwrap();
        let msg = b.try_recv(16).unwrap().expect("message present");
        assert_eq!(msg.bytes, alloc::vec![1, 2, 3]);
    }

    #[test]
    fn close_propagates_after_drain() {
        let (a, b) = Channel::create_pair();
        a.send(alloc::vec![1], Vec::new()).unwrap();
        a.send(alloc::vec![2], Vec::new()).unwrap();
        drop(a);
        assert!(b.try_recv(16).unwrap().is_some());
        assert!(b.try_recv(16).unwrap().is_some());
        assert!(matches!(b.try_recv(16), Err(KError::EndOfStream)));
    }

    #[test]
    fn send_after_peer_close_fails() {
        let (a, b) = Channel::create_pair();
        drop(b);
        assert!(matches!(a.send(alloc::vec![1], Vec::new()), Err(KError::AlreadyClosed)));
    }

    #[test]
    fn truncated_recv_leaves_message_enqueued() {
        let (a, b) = Channel::create_pair();
        a.send(alloc::vec![1, 2, 3, 4], Vec::new()).unwrap();
        assert!(matches!(b.try_recv(2), Err(KError::Truncated)));
        // The message is still there, and a big-enough buffer now drains it.
        let msg = b.try_recv(16).unwrap().expect("message should still be queued");
        assert_eq!(msg.bytes, alloc::vec![1, 2, 3, 4]);
    }
}
