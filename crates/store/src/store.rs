//! Store implementation

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chacha20poly1305::XChaCha20Poly1305;
use tokio_util::sync::CancellationToken;

use skewer_config::DestinationType;
use skewer_kring::{open_blob, seal_blob};
use skewer_model::{FullMessage, Uid};
use skewer_queue::{OfferError, Ring};

use crate::StoreError;

/// Marker trees carry no value; the key is the record.
const EMPTY: &[u8] = &[];

/// Outcome of a successful stash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashStatus {
    /// Persisted and enqueued to every enabled destination
    Complete,
    /// Persisted everywhere, but at least one dispatch ring was full; the
    /// sweeper will enqueue those copies later. Callers should slow down.
    Partial,
}

/// Delivery state of one `(uid, destination)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRecordState {
    Queued,
    Sent,
    Ready,
    Failed,
}

struct DestTrees {
    queued: sled::Tree,
    sent: sled::Tree,
    ready: sled::Tree,
    failed: sled::Tree,
    ring: Arc<Ring<Uid>>,
}

pub struct MessageStore {
    db: sled::Db,
    messages: sled::Tree,
    dests: BTreeMap<DestinationType, DestTrees>,
    cipher: XChaCha20Poly1305,
    fatal: CancellationToken,
}

impl MessageStore {
    /// Open (or create) the store, run recovery, and hand back the shared
    /// handle. Every key surviving a previous run is routed back through
    /// `ready` so the sweeper re-enqueues it.
    pub fn open(
        path: &Path,
        enabled: &[DestinationType],
        ring_capacity: usize,
        cipher: XChaCha20Poly1305,
    ) -> Result<Arc<MessageStore>, StoreError> {
        let db = sled::open(path)?;
        let messages = db.open_tree("messages")?;

        let mut dests = BTreeMap::new();
        for dest in enabled {
            let name = dest.as_str();
            dests.insert(
                *dest,
                DestTrees {
                    queued: db.open_tree(format!("queued:{name}"))?,
                    sent: db.open_tree(format!("sent:{name}"))?,
                    ready: db.open_tree(format!("ready:{name}"))?,
                    failed: db.open_tree(format!("failed:{name}"))?,
                    ring: Arc::new(Ring::new(ring_capacity)),
                },
            );
        }

        let store = Arc::new(MessageStore {
            db,
            messages,
            dests,
            cipher,
            fatal: CancellationToken::new(),
        });
        store.recover()?;
        Ok(store)
    }

    /// The close-once fatal channel. Cancelled on any unrecoverable store
    /// error; the supervisor aborts the whole process on it.
    pub fn shutdown_chan(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Destinations this store fans out to.
    pub fn destinations(&self) -> Vec<DestinationType> {
        self.dests.keys().copied().collect()
    }

    /// The dispatch ring for one destination.
    pub fn ring(&self, dest: DestinationType) -> Option<Arc<Ring<Uid>>> {
        self.dests.get(&dest).map(|d| Arc::clone(&d.ring))
    }

    fn trees(&self, dest: DestinationType) -> Result<&DestTrees, StoreError> {
        self.dests
            .get(&dest)
            .ok_or_else(|| StoreError::Db(sled::Error::Unsupported("destination not enabled".into())))
    }

    fn fatal_db<T>(&self, result: Result<T, sled::Error>) -> Result<T, StoreError> {
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::error!(error = %e, "fatal store error");
                self.fatal.cancel();
                Err(e.into())
            }
        }
    }

    /// Persist one message and enqueue it toward every enabled destination.
    ///
    /// An `Err` is fatal (disk write or seal failed; the fatal token is
    /// already cancelled). `Partial` means backpressure: at least one ring
    /// was full and the sweeper owns the retry.
    pub fn stash(&self, msg: &FullMessage) -> Result<StashStatus, StoreError> {
        let key = msg.uid.to_bytes();
        let plain = msg.to_vec().map_err(|_| StoreError::Serde(msg.uid))?;
        let sealed = seal_blob(&self.cipher, &plain).map_err(|_| {
            self.fatal.cancel();
            StoreError::Crypto(msg.uid)
        })?;

        self.fatal_db(self.messages.insert(key, sealed).map(|_| ()))?;
        for trees in self.dests.values() {
            self.fatal_db(trees.queued.insert(key, EMPTY).map(|_| ()))?;
        }
        // write-through: the message is on disk before anyone sees it
        self.fatal_db(self.db.flush().map(|_| ()))?;

        let mut status = StashStatus::Complete;
        for trees in self.dests.values() {
            match trees.ring.offer(msg.uid) {
                Ok(()) => {
                    self.fatal_db(trees.queued.remove(key).map(|_| ()))?;
                    self.fatal_db(trees.sent.insert(key, EMPTY).map(|_| ()))?;
                }
                Err(OfferError::Full(_)) | Err(OfferError::Disposed(_)) => {
                    // stays in queued; the sweeper will pick it up
                    status = StashStatus::Partial;
                }
            }
        }
        Ok(status)
    }

    /// Load and open one payload. `None` when the message has already been
    /// released (acked everywhere between ring hand-off and this read).
    pub fn retrieve(&self, uid: Uid) -> Result<Option<FullMessage>, StoreError> {
        let Some(sealed) = self.messages.get(uid.to_bytes())? else {
            return Ok(None);
        };
        let plain = open_blob(&self.cipher, &sealed).map_err(|_| StoreError::Crypto(uid))?;
        let msg = FullMessage::from_slice(&plain).map_err(|_| StoreError::Serde(uid))?;
        Ok(Some(msg))
    }

    /// The destination acknowledged delivery: drop its key, release the
    /// payload if it was the last one.
    pub fn ack(&self, uid: Uid, dest: DestinationType) -> Result<(), StoreError> {
        let key = uid.to_bytes();
        let trees = self.trees(dest)?;
        self.fatal_db(trees.sent.remove(key).map(|_| ()))?;
        self.fatal_db(trees.queued.remove(key).map(|_| ()))?;
        self.fatal_db(trees.ready.remove(key).map(|_| ()))?;
        self.maybe_release(uid)
    }

    /// Transient failure: queue for the next sweep.
    pub fn nack(&self, uid: Uid, dest: DestinationType) -> Result<(), StoreError> {
        let key = uid.to_bytes();
        let trees = self.trees(dest)?;
        self.fatal_db(trees.sent.remove(key).map(|_| ()))?;
        self.fatal_db(trees.queued.remove(key).map(|_| ()))?;
        self.fatal_db(trees.ready.insert(key, EMPTY).map(|_| ()))?;
        Ok(())
    }

    /// Permanent failure: move to the poison namespace, retained for
    /// operator inspection (the payload stays with it).
    pub fn permerr(&self, uid: Uid, dest: DestinationType) -> Result<(), StoreError> {
        let key = uid.to_bytes();
        let trees = self.trees(dest)?;
        self.fatal_db(trees.sent.remove(key).map(|_| ()))?;
        self.fatal_db(trees.queued.remove(key).map(|_| ()))?;
        self.fatal_db(trees.ready.remove(key).map(|_| ()))?;
        self.fatal_db(trees.failed.insert(key, EMPTY).map(|_| ()))?;
        Ok(())
    }

    fn maybe_release(&self, uid: Uid) -> Result<(), StoreError> {
        let key = uid.to_bytes();
        for trees in self.dests.values() {
            if self.fatal_db(trees.queued.contains_key(key))?
                || self.fatal_db(trees.sent.contains_key(key))?
                || self.fatal_db(trees.ready.contains_key(key))?
                || self.fatal_db(trees.failed.contains_key(key))?
            {
                return Ok(());
            }
        }
        self.fatal_db(self.messages.remove(key).map(|_| ()))?;
        Ok(())
    }

    /// One sweep round: re-enqueue `ready` and stale `queued` keys, oldest
    /// first, as far as ring capacity allows.
    pub fn sweep(&self) -> Result<usize, StoreError> {
        let mut moved = 0;
        for trees in self.dests.values() {
            for source in [&trees.ready, &trees.queued] {
                for entry in source.iter() {
                    let (key, _) = self.fatal_db(entry)?;
                    let mut bytes = [0u8; 16];
                    if key.len() != 16 {
                        continue;
                    }
                    bytes.copy_from_slice(&key);
                    let uid = Uid::from_bytes(bytes);
                    match trees.ring.offer(uid) {
                        Ok(()) => {
                            self.fatal_db(source.remove(&key).map(|_| ()))?;
                            self.fatal_db(trees.sent.insert(&key, EMPTY).map(|_| ()))?;
                            moved += 1;
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        Ok(moved)
    }

    /// Startup recovery: everything that was in flight goes back through
    /// `ready`, then one sweep fills the rings.
    fn recover(&self) -> Result<(), StoreError> {
        let mut recovered = 0usize;
        for trees in self.dests.values() {
            for source in [&trees.sent, &trees.queued] {
                for entry in source.iter() {
                    let (key, _) = self.fatal_db(entry)?;
                    self.fatal_db(trees.ready.insert(&key, EMPTY).map(|_| ()))?;
                    self.fatal_db(source.remove(&key).map(|_| ()))?;
                    recovered += 1;
                }
            }
            recovered += trees.ready.len();
        }
        if recovered > 0 {
            tracing::info!(keys = recovered, "store recovery re-queued surviving messages");
        }
        self.sweep()?;
        Ok(())
    }

    /// Run the periodic sweeper until the token is cancelled.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.fatal.cancelled() => return,
                _ = ticker.tick() => {
                    match self.sweep() {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(requeued = n, "sweeper pass"),
                        Err(e) => {
                            tracing::error!(error = %e, "sweeper failed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Delivery state of `(uid, dest)`, if any key for it exists.
    pub fn state(&self, uid: Uid, dest: DestinationType) -> Result<Option<StoreRecordState>, StoreError> {
        let key = uid.to_bytes();
        let trees = self.trees(dest)?;
        let state = if trees.queued.contains_key(key)? {
            Some(StoreRecordState::Queued)
        } else if trees.sent.contains_key(key)? {
            Some(StoreRecordState::Sent)
        } else if trees.ready.contains_key(key)? {
            Some(StoreRecordState::Ready)
        } else if trees.failed.contains_key(key)? {
            Some(StoreRecordState::Failed)
        } else {
            None
        };
        Ok(state)
    }

    /// True when the payload for `uid` is still on disk.
    pub fn holds_payload(&self, uid: Uid) -> Result<bool, StoreError> {
        Ok(self.messages.contains_key(uid.to_bytes())?)
    }

    /// Dispose every dispatch ring (shutdown path).
    pub fn dispose_rings(&self) {
        for trees in self.dests.values() {
            trees.ring.dispose();
        }
    }

    /// Flush the database (shutdown path).
    pub fn flush(&self) -> Result<(), StoreError> {
        self.fatal_db(self.db.flush().map(|_| ()))
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
