//! Ack queue tests

use std::sync::Arc;
use std::time::Duration;

use crate::{wait_any, AckQueue, RingError};

#[test]
fn put_get_fifo() {
    let q = AckQueue::new();
    q.put(1).unwrap();
    q.put(2).unwrap();
    assert!(q.has());
    assert_eq!(q.get(), Some(1));
    assert_eq!(q.get(), Some(2));
    assert_eq!(q.get(), None);
}

#[test]
fn put_on_disposed_fails() {
    let q = AckQueue::new();
    q.dispose();
    assert_eq!(q.put(1), Err(RingError::Disposed));
}

#[test]
fn wait_any_returns_on_item() {
    let succ = Arc::new(AckQueue::new());
    let fail = Arc::new(AckQueue::new());
    let (s, f) = (Arc::clone(&succ), Arc::clone(&fail));
    let waiter = std::thread::spawn(move || wait_any(&s, &f));
    std::thread::sleep(Duration::from_millis(20));
    fail.put(7).unwrap();
    assert!(waiter.join().unwrap());
    assert_eq!(fail.get(), Some(7));
}

#[test]
fn wait_any_returns_false_on_dispose() {
    let succ = Arc::new(AckQueue::new());
    let fail = Arc::new(AckQueue::new());
    let (s, f) = (Arc::clone(&succ), Arc::clone(&fail));
    let waiter = std::thread::spawn(move || wait_any(&s, &f));
    std::thread::sleep(Duration::from_millis(20));
    succ.dispose();
    assert!(!waiter.join().unwrap());
}
