//! Destinations
//!
//! Fan-out side of the store: one worker set per enabled destination reads
//! message uids from its dispatch ring, loads the payload, runs the filter
//! environment and drives the destination driver. Outcomes flow back into
//! the store as `ack` / `nack` / `permerr`.
//!
//! Every destination exposes a fatal channel (a close-once token). Closing
//! it stops the worker; the dispatcher then rebuilds the destination under
//! an explicit retry budget. The rebind timer closes the fatal channel on
//! schedule so long-lived connections get re-established periodically.

mod base;
mod dispatcher;
mod drivers;
mod metrics;

pub use base::{BaseDestination, DestEnv};
pub use dispatcher::Dispatcher;
pub use drivers::build_destination;
pub use metrics::DestMetrics;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use skewer_model::FullMessage;

/// One routed message on its way out: the payload plus the routing the
/// filter environment computed for it.
#[derive(Debug, Clone)]
pub struct OutputMsg {
    pub message: FullMessage,
    pub topic: String,
    pub partition_key: String,
    pub partition: Option<i32>,
}

#[derive(Debug, Error)]
pub enum DestError {
    #[error(transparent)]
    Client(#[from] skewer_clients::ClientError),

    #[error(transparent)]
    Store(#[from] skewer_store::StoreError),

    #[error("destination I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("destination configuration error: {0}")]
    Config(String),
}

/// The narrow destination interface: adding a destination is adding a
/// variant in the config plus an implementation of this trait.
///
/// `send` settles each message's fate itself (through the base callbacks);
/// an `Err` means the driver is in a state the dispatcher should treat as
/// fatal for the current incarnation.
#[async_trait]
pub trait Destination: Send {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError>;
    async fn close(&mut self);
    fn fatal(&self) -> CancellationToken;
}
