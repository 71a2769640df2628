//! Bounded lock-free MPMC ring buffer
//!
//! The classic bounded MPMC layout: one sequence number per slot, two
//! cache-padded cursors, CAS-only synchronization
//! (<http://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue>).
//! Capacity is rounded up to the next power of two.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

use crate::{Backoff, RingError};

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded MPMC queue.
///
/// `put`/`get` block (with progressive back-off) until space/items are
/// available or the ring is disposed; `offer`/`try_get` never block;
/// `put_async`/`get_async` are the cooperative mirrors for tokio tasks.
///
/// Disposal is one-way and idempotent: producers fail immediately, consumers
/// drain what is left and then see [`RingError::Disposed`].
pub struct Ring<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    enqueue: CachePadded<AtomicUsize>,
    dequeue: CachePadded<AtomicUsize>,
    disposed: AtomicBool,
}

unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

enum TryPut<T> {
    Done,
    Full(T),
}

enum TryGet<T> {
    Item(T),
    Empty,
}

impl<T> Ring<T> {
    /// Create a ring with at least `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ring {
            slots,
            mask: capacity - 1,
            enqueue: CachePadded::new(AtomicUsize::new(0)),
            dequeue: CachePadded::new(AtomicUsize::new(0)),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of items currently enqueued. `len() <= capacity()` always.
    pub fn len(&self) -> usize {
        let enq = self.enqueue.load(Ordering::Relaxed);
        let deq = self.dequeue.load(Ordering::Relaxed);
        enq.saturating_sub(deq)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose the ring, waking every blocked producer and consumer.
    /// Idempotent. Items already enqueued stay readable until drained.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn try_put_inner(&self, item: T) -> TryPut<T> {
        let mut pos = self.enqueue.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - pos as isize;
            if dif == 0 {
                match self.enqueue.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(item) };
                        slot.seq.store(pos + 1, Ordering::Release);
                        return TryPut::Done;
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return TryPut::Full(item);
            } else {
                pos = self.enqueue.load(Ordering::Relaxed);
            }
        }
    }

    fn try_get_inner(&self) -> TryGet<T> {
        let mut pos = self.dequeue.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - (pos + 1) as isize;
            if dif == 0 {
                match self.dequeue.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq.store(pos + self.mask + 1, Ordering::Release);
                        return TryGet::Item(value);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return TryGet::Empty;
            } else {
                pos = self.dequeue.load(Ordering::Relaxed);
            }
        }
    }

    /// Non-blocking put. Returns the item back on a full ring.
    pub fn offer(&self, item: T) -> Result<(), OfferError<T>> {
        if self.is_disposed() {
            return Err(OfferError::Disposed(item));
        }
        match self.try_put_inner(item) {
            TryPut::Done => Ok(()),
            TryPut::Full(item) => Err(OfferError::Full(item)),
        }
    }

    /// Non-blocking get.
    pub fn try_get(&self) -> Option<T> {
        match self.try_get_inner() {
            TryGet::Item(v) => Some(v),
            TryGet::Empty => None,
        }
    }

    /// Blocking put with progressive back-off.
    pub fn put(&self, mut item: T) -> Result<(), RingError> {
        let mut backoff = Backoff::new();
        loop {
            if self.is_disposed() {
                return Err(RingError::Disposed);
            }
            match self.try_put_inner(item) {
                TryPut::Done => return Ok(()),
                TryPut::Full(back) => item = back,
            }
            backoff.wait();
        }
    }

    /// Blocking get. Remaining items are drained even after disposal;
    /// `Disposed` is only reported once the ring is empty.
    pub fn get(&self) -> Result<T, RingError> {
        let mut backoff = Backoff::new();
        loop {
            if let TryGet::Item(v) = self.try_get_inner() {
                return Ok(v);
            }
            if self.is_disposed() {
                return Err(RingError::Disposed);
            }
            backoff.wait();
        }
    }

    /// Blocking get with a deadline. A zero timeout blocks indefinitely.
    pub fn poll(&self, timeout: Duration) -> Result<T, RingError> {
        if timeout.is_zero() {
            return self.get();
        }
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if let TryGet::Item(v) = self.try_get_inner() {
                return Ok(v);
            }
            if self.is_disposed() {
                return Err(RingError::Disposed);
            }
            if Instant::now() >= deadline {
                return Err(RingError::Timeout);
            }
            backoff.wait();
        }
    }

    /// Cooperative put for tokio tasks.
    pub async fn put_async(&self, mut item: T) -> Result<(), RingError> {
        let mut backoff = Backoff::new();
        loop {
            if self.is_disposed() {
                return Err(RingError::Disposed);
            }
            match self.try_put_inner(item) {
                TryPut::Done => return Ok(()),
                TryPut::Full(back) => item = back,
            }
            backoff.wait_async().await;
        }
    }

    /// Cooperative get for tokio tasks, with the same drain-then-disposed
    /// contract as [`Ring::get`].
    pub async fn get_async(&self) -> Result<T, RingError> {
        let mut backoff = Backoff::new();
        loop {
            if let TryGet::Item(v) = self.try_get_inner() {
                return Ok(v);
            }
            if self.is_disposed() {
                return Err(RingError::Disposed);
            }
            backoff.wait_async().await;
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        while let TryGet::Item(v) = self.try_get_inner() {
            drop(v);
        }
    }
}

/// Outcome of a non-blocking [`Ring::offer`].
#[derive(Debug)]
pub enum OfferError<T> {
    /// No free slot; the item is handed back.
    Full(T),
    /// The ring was disposed; the item is handed back.
    Disposed(T),
}

#[cfg(test)]
#[path = "ring_test.rs"]
mod ring_test;
