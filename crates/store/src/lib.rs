//! Durable message store
//!
//! A write-through persistent queue over an ordered embedded key-value
//! store. Values are AEAD-sealed serialized messages; keys are the
//! message ULIDs, namespaced per destination and per delivery state:
//!
//! | tree | meaning |
//! |---|---|
//! | `messages` | uid -> sealed payload (shared by all destinations) |
//! | `queued:<dest>` | persisted, not yet handed to the dispatch ring |
//! | `sent:<dest>` | handed to the dispatch ring, awaiting the verdict |
//! | `ready:<dest>` | nacked, waiting for the sweeper to retry |
//! | `failed:<dest>` | permanent failure, retained for the operator |
//!
//! A payload is released only when no destination holds any key for it in
//! any tree - `failed` included, so poisoned messages stay inspectable.
//! Guarantee: at-least-once per enabled destination across process
//! restarts; recovery moves every surviving key back through `ready` and
//! the sweeper re-enqueues from there.
//!
//! Any disk or crypto failure on the write path cancels the store's fatal
//! token, which the supervisor treats as a full-process abort.

mod store;

pub use store::{MessageStore, StashStatus, StoreRecordState};

use skewer_model::Uid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store database error: {0}")]
    Db(#[from] sled::Error),

    #[error("store payload for {0} failed to seal/open")]
    Crypto(Uid),

    #[error("store payload for {0} failed to (de)serialize")]
    Serde(Uid),
}
