//! Message model for skewer
//!
//! The types that flow through the collector, from listener to destination:
//!
//! - [`Uid`] - 128-bit lexicographically sortable identifier (sessions,
//!   connections, configurations, messages)
//! - [`RawMessage`] - an undecoded frame as demarcated by a listener
//! - [`SyslogMessage`] - the parsed, common structured form
//! - [`FullMessage`] - the unit persisted by the store and fanned out to
//!   destinations
//!
//! Decoding (RFC 3164, RFC 5424, JSON) lives in [`decoders`]; the output
//! encoders used by destinations live in [`encoders`].

mod error;
mod facility;
mod message;
mod severity;
mod uid;

pub mod decoders;
pub mod encoders;

pub use error::DecodeError;
pub use facility::Facility;
pub use message::{
    DecoderConfig, Format, FullMessage, ListenerInfo, RawMessage, SyslogMessage,
    SKEWER_NAMESPACE,
};
pub use severity::Severity;
pub use uid::{Generator, Uid};
