//! Unbounded success/failure queues for the RELP acknowledgement forwarder.
//!
//! One pair per connection: the parser pool and the destination side push
//! transaction numbers in, the per-connection response writer drains both
//! and commits answers in order.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::SegQueue;

use crate::{Backoff, RingError};

/// Unbounded MPMC queue of transaction numbers with the ring disposal idiom.
#[derive(Debug, Default)]
pub struct AckQueue {
    inner: SegQueue<i32>,
    disposed: AtomicBool,
}

impl AckQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, txnr: i32) -> Result<(), RingError> {
        if self.is_disposed() {
            return Err(RingError::Disposed);
        }
        self.inner.push(txnr);
        Ok(())
    }

    /// Pop the next transaction number, `None` when currently empty.
    pub fn get(&self) -> Option<i32> {
        self.inner.pop()
    }

    pub fn has(&self) -> bool {
        !self.inner.is_empty()
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Block until either queue has an item. Returns `false` when one of them
/// has been disposed.
pub fn wait_any(q1: &AckQueue, q2: &AckQueue) -> bool {
    let mut backoff = Backoff::new();
    loop {
        if q1.is_disposed() || q2.is_disposed() {
            return false;
        }
        if q1.has() || q2.has() {
            return true;
        }
        backoff.wait();
    }
}

/// Cooperative variant of [`wait_any`] for tokio tasks.
pub async fn wait_any_async(q1: &AckQueue, q2: &AckQueue) -> bool {
    let mut backoff = Backoff::new();
    loop {
        if q1.is_disposed() || q2.is_disposed() {
            return false;
        }
        if q1.has() || q2.has() {
            return true;
        }
        backoff.wait_async().await;
    }
}

#[cfg(test)]
#[path = "ack_test.rs"]
mod ack_test;
