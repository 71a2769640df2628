//! Store tests
//!
//! Restart scenarios reopen the same directory after dropping the handle
//! without a clean shutdown, which is what a SIGKILL leaves behind.

use std::path::Path;
use std::sync::Arc;

use chacha20poly1305::{KeyInit, XChaCha20Poly1305};

use skewer_config::DestinationType;
use skewer_model::{FullMessage, SyslogMessage, Uid};

use crate::{MessageStore, StashStatus, StoreRecordState};

const DEST: DestinationType = DestinationType::Tcp;

fn cipher() -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new((&[42u8; 32]).into())
}

fn open(path: &Path, dests: &[DestinationType], capacity: usize) -> Arc<MessageStore> {
    MessageStore::open(path, dests, capacity, cipher()).unwrap()
}

fn message(text: &str) -> FullMessage {
    FullMessage {
        uid: Uid::new(),
        conn_id: Uid::ZERO,
        conf_id: Uid::ZERO,
        txnr: None,
        fields: SyslogMessage {
            message: text.into(),
            time_generated: chrono::Utc::now(),
            ..Default::default()
        },
    }
}

#[test]
fn stash_enqueues_and_ack_releases() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), &[DEST], 16);
    let msg = message("one");

    assert_eq!(store.stash(&msg).unwrap(), StashStatus::Complete);
    assert_eq!(store.state(msg.uid, DEST).unwrap(), Some(StoreRecordState::Sent));
    assert!(store.holds_payload(msg.uid).unwrap());

    let ring = store.ring(DEST).unwrap();
    assert_eq!(ring.try_get(), Some(msg.uid));

    let loaded = store.retrieve(msg.uid).unwrap().unwrap();
    assert_eq!(loaded, msg);

    store.ack(msg.uid, DEST).unwrap();
    // no pending destination keys -> payload evicted
    assert_eq!(store.state(msg.uid, DEST).unwrap(), None);
    assert!(!store.holds_payload(msg.uid).unwrap());
}

#[test]
fn payload_released_only_when_every_destination_is_done() {
    let dir = tempfile::tempdir().unwrap();
    let dests = [DestinationType::Tcp, DestinationType::Stderr];
    let store = open(dir.path(), &dests, 16);
    let msg = message("fanout");
    store.stash(&msg).unwrap();

    store.ack(msg.uid, DestinationType::Tcp).unwrap();
    assert!(store.holds_payload(msg.uid).unwrap());

    store.ack(msg.uid, DestinationType::Stderr).unwrap();
    assert!(!store.holds_payload(msg.uid).unwrap());
}

#[test]
fn nack_goes_to_ready_and_sweeper_requeues() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), &[DEST], 16);
    let msg = message("retry me");
    store.stash(&msg).unwrap();
    let ring = store.ring(DEST).unwrap();
    assert_eq!(ring.try_get(), Some(msg.uid));

    store.nack(msg.uid, DEST).unwrap();
    assert_eq!(store.state(msg.uid, DEST).unwrap(), Some(StoreRecordState::Ready));

    let moved = store.sweep().unwrap();
    assert_eq!(moved, 1);
    assert_eq!(store.state(msg.uid, DEST).unwrap(), Some(StoreRecordState::Sent));
    assert_eq!(ring.try_get(), Some(msg.uid));
}

#[test]
fn permerr_is_poison_and_retains_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), &[DEST], 16);
    let msg = message("poison");
    store.stash(&msg).unwrap();

    store.permerr(msg.uid, DEST).unwrap();
    assert_eq!(store.state(msg.uid, DEST).unwrap(), Some(StoreRecordState::Failed));
    // retained for inspection
    assert!(store.holds_payload(msg.uid).unwrap());

    // the sweeper must not resurrect poisoned messages
    assert_eq!(store.sweep().unwrap(), 0);
}

#[test]
fn full_ring_leaves_queued_and_reports_partial() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), &[DEST], 2);
    let ring = store.ring(DEST).unwrap();

    let mut uids = Vec::new();
    let mut statuses = Vec::new();
    for i in 0..4 {
        let msg = message(&format!("m{i}"));
        uids.push(msg.uid);
        statuses.push(store.stash(&msg).unwrap());
    }

    assert!(statuses.contains(&StashStatus::Partial));
    // ring capacity is 2; the overflow stays queued for the sweeper
    assert_eq!(store.state(uids[3], DEST).unwrap(), Some(StoreRecordState::Queued));

    // drain and sweep: everything eventually reaches the ring exactly once
    let mut delivered = Vec::new();
    loop {
        while let Some(uid) = ring.try_get() {
            delivered.push(uid);
            store.ack(uid, DEST).unwrap();
        }
        if delivered.len() == uids.len() {
            break;
        }
        store.sweep().unwrap();
    }
    delivered.sort();
    let mut expected = uids.clone();
    expected.sort();
    assert_eq!(delivered, expected);
}

#[test]
fn recovery_requeues_unacked_messages() {
    let dir = tempfile::tempdir().unwrap();
    let mut uids = Vec::new();
    {
        let store = open(dir.path(), &[DEST], 256);
        for i in 0..100 {
            let msg = message(&format!("m{i}"));
            uids.push(msg.uid);
            store.stash(&msg).unwrap();
        }
        // worker is blocked: nothing acked; handle dropped without shutdown
    }

    let store = open(dir.path(), &[DEST], 256);
    let ring = store.ring(DEST).unwrap();
    let mut recovered = Vec::new();
    while let Some(uid) = ring.try_get() {
        assert!(store.retrieve(uid).unwrap().is_some());
        recovered.push(uid);
    }
    recovered.sort();
    uids.sort();
    assert_eq!(recovered, uids, "all 100 messages survive the crash");
}

#[test]
fn restart_then_shutdown_preserves_keys() {
    let dir = tempfile::tempdir().unwrap();
    let msg = message("still here");
    {
        let store = open(dir.path(), &[DEST], 16);
        store.stash(&msg).unwrap();
    }
    {
        let store = open(dir.path(), &[DEST], 16);
        assert!(store.holds_payload(msg.uid).unwrap());
        store.flush().unwrap();
    }
    let store = open(dir.path(), &[DEST], 16);
    assert!(store.holds_payload(msg.uid).unwrap());
    assert_eq!(store.state(msg.uid, DEST).unwrap(), Some(StoreRecordState::Sent));
}

#[test]
fn wrong_key_cannot_open_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let msg = message("sealed");
    {
        let store = open(dir.path(), &[DEST], 16);
        store.stash(&msg).unwrap();
    }
    let other = MessageStore::open(
        dir.path(),
        &[DEST],
        16,
        XChaCha20Poly1305::new((&[7u8; 32]).into()),
    )
    .unwrap();
    assert!(other.retrieve(msg.uid).is_err());
}
