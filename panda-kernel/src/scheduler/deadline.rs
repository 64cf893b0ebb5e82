//! Deadline tracking for blocked threads.
//!
//! Backs `channel_recv`'s optional deadline argument: a thread blocked in a
//! receive registers a wake time here, and the timer interrupt handler wakes
//! it with a timeout indication if no message arrives first.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use log::debug;

use crate::thread::ThreadId;

/// Maps deadline (ms since boot) -> threads waiting to be woken at that time.
pub struct DeadlineTracker {
    deadlines: BTreeMap<u64, Vec<ThreadId>>,
}

impl Default for DeadlineTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineTracker {
    pub fn new() -> Self {
        Self {
            deadlines: BTreeMap::new(),
        }
    }

    /// Register a deadline for a thread. When it arrives (checked via
    /// `collect_expired`), the thread is returned for the caller to wake.
    pub fn register(&mut self, tid: ThreadId, deadline_ms: u64) {
        self.deadlines.entry(deadline_ms).or_default().push(tid);
    }

    /// Remove a thread from every deadline it's registered under (used when
    /// a message arrives before the deadline expires, so a stale timeout
    /// doesn't also fire).
    pub fn cancel(&mut self, tid: ThreadId) {
        self.deadlines.retain(|_, tids| {
            tids.retain(|&t| t != tid);
            !tids.is_empty()
        });
    }

    /// Collect threads whose deadlines have expired.
    pub fn collect_expired(&mut self, now_ms: u64) -> Vec<ThreadId> {
        let expired_keys: Vec<u64> = self
            .deadlines
            .range(..=now_ms)
            .map(|(&deadline, _)| deadline)
            .collect();

        let mut woken = Vec::new();
        for key in expired_keys {
            if let Some(tids) = self.deadlines.remove(&key) {
                woken.extend(tids);
            }
        }

        if !woken.is_empty() {
            debug!("Collected {} expired threads at {}", woken.len(), now_ms);
        }

        woken
    }

    /// Earliest pending deadline, for timer calculation.
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.keys().next().copied()
    }
}
