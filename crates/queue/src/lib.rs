//! Ring buffers for the skewer pipeline
//!
//! All stage-to-stage hand-offs (listener -> parser pool -> store ->
//! destination workers) go through the same bounded MPMC ring so that
//! shutdown is uniform: disposing a ring propagates [`RingError::Disposed`]
//! through every consumer, which then exits in order.
//!
//! [`Ring`] is the bounded queue; [`AckQueue`] is the unbounded
//! success/failure queue pair used by the RELP acknowledgement forwarder.

mod ack;
mod backoff;
mod ring;

pub use ack::{wait_any, wait_any_async, AckQueue};
pub use backoff::Backoff;
pub use ring::{OfferError, Ring};

use thiserror::Error;

/// Errors returned by ring operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    /// The ring was disposed; the pipeline stage should exit.
    #[error("ring buffer has been disposed")]
    Disposed,

    /// `poll` gave up before an item arrived.
    #[error("timed out waiting on ring buffer")]
    Timeout,
}
