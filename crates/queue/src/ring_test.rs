//! Ring buffer tests

use std::sync::Arc;
use std::time::Duration;

use crate::ring::OfferError;
use crate::{Ring, RingError};

#[test]
fn capacity_rounds_up_to_power_of_two() {
    assert_eq!(Ring::<u32>::new(100).capacity(), 128);
    assert_eq!(Ring::<u32>::new(128).capacity(), 128);
    assert_eq!(Ring::<u32>::new(1).capacity(), 2);
}

#[test]
fn fifo_order() {
    let ring = Ring::new(8);
    for i in 0..8 {
        ring.put(i).unwrap();
    }
    for i in 0..8 {
        assert_eq!(ring.get().unwrap(), i);
    }
}

#[test]
fn len_never_exceeds_capacity() {
    let ring = Ring::new(4);
    for i in 0..4 {
        ring.offer(i).unwrap();
    }
    assert_eq!(ring.len(), 4);
    assert!(matches!(ring.offer(99), Err(OfferError::Full(99))));
    assert_eq!(ring.len(), ring.capacity());
}

#[test]
fn poll_times_out_when_empty() {
    let ring: Ring<u32> = Ring::new(4);
    let err = ring.poll(Duration::from_millis(20)).unwrap_err();
    assert_eq!(err, RingError::Timeout);
}

#[test]
fn dispose_is_idempotent_and_fails_producers() {
    let ring: Ring<u32> = Ring::new(4);
    ring.dispose();
    ring.dispose();
    assert!(ring.is_disposed());
    assert_eq!(ring.put(1), Err(RingError::Disposed));
    assert!(matches!(ring.offer(1), Err(OfferError::Disposed(1))));
}

#[test]
fn consumers_drain_after_dispose() {
    let ring = Ring::new(4);
    ring.put(1).unwrap();
    ring.put(2).unwrap();
    ring.dispose();
    assert_eq!(ring.get().unwrap(), 1);
    assert_eq!(ring.get().unwrap(), 2);
    assert_eq!(ring.get(), Err(RingError::Disposed));
}

#[test]
fn dispose_wakes_blocked_getter() {
    let ring: Arc<Ring<u32>> = Arc::new(Ring::new(4));
    let r = Arc::clone(&ring);
    let handle = std::thread::spawn(move || r.get());
    std::thread::sleep(Duration::from_millis(50));
    ring.dispose();
    assert_eq!(handle.join().unwrap(), Err(RingError::Disposed));
}

#[test]
fn dispose_wakes_blocked_putter() {
    let ring: Arc<Ring<u32>> = Arc::new(Ring::new(2));
    ring.put(1).unwrap();
    ring.put(2).unwrap();
    let r = Arc::clone(&ring);
    let handle = std::thread::spawn(move || r.put(3));
    std::thread::sleep(Duration::from_millis(50));
    ring.dispose();
    assert_eq!(handle.join().unwrap(), Err(RingError::Disposed));
}

#[test]
fn concurrent_producers_and_consumers() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 10_000;

    let ring: Arc<Ring<usize>> = Arc::new(Ring::new(64));
    let mut handles = Vec::new();

    for p in 0..PRODUCERS {
        let ring = Arc::clone(&ring);
        handles.push(std::thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                ring.put(p * PER_PRODUCER + i).unwrap();
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..CONSUMERS {
        let ring = Arc::clone(&ring);
        consumers.push(std::thread::spawn(move || {
            let mut seen = Vec::new();
            while let Ok(v) = ring.get() {
                seen.push(v);
            }
            seen
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    // producers done; drain stragglers then release the consumers
    while !ring.is_empty() {
        std::thread::yield_now();
    }
    ring.dispose();

    let mut all: Vec<usize> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();
    all.sort_unstable();
    let expected: Vec<usize> = (0..PRODUCERS * PER_PRODUCER).collect();
    assert_eq!(all, expected);
}

#[tokio::test]
async fn async_put_and_get() {
    let ring: Arc<Ring<u32>> = Arc::new(Ring::new(4));
    let r = Arc::clone(&ring);
    let consumer = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Ok(v) = r.get_async().await {
            out.push(v);
        }
        out
    });

    for i in 0..16 {
        ring.put_async(i).await.unwrap();
    }
    // give the consumer time to drain before disposal
    tokio::time::sleep(Duration::from_millis(50)).await;
    ring.dispose();
    let got = consumer.await.unwrap();
    assert_eq!(got, (0..16).collect::<Vec<_>>());
}

#[test]
fn drop_releases_remaining_items() {
    let ring = Ring::new(4);
    ring.put(Arc::new(1u32)).unwrap();
    let item = Arc::new(2u32);
    ring.put(Arc::clone(&item)).unwrap();
    drop(ring);
    assert_eq!(Arc::strong_count(&item), 1);
}
