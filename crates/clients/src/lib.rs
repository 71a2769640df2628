//! Outbound clients
//!
//! The transport halves of the destination drivers: a syslog-over-TCP
//! writer, a RELP client with transaction windows, a Kafka producer wrapper
//! exposing asynchronous success/error streams, and a small HTTP poster.
//!
//! Encoding failures are surfaced distinctly from transport failures: the
//! dispatcher maps the former to `permerr` and the latter to `nack`.

mod http;
mod kafka;
mod relp;
mod tcp;

pub use http::HttpPoster;
pub use kafka::{is_fatal_broker_error, DeliveryReport, KafkaProducer, MessageMeta};
pub use relp::RelpClient;
pub use tcp::SyslogTcpClient;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The message could not be encoded; retrying cannot help.
    #[error("encoding failed: {0}")]
    Encoding(#[from] skewer_model::encoders::EncodeError),

    #[error("connection failed to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// True when the failure is tied to the message bytes themselves.
    pub fn is_encoding(&self) -> bool {
        matches!(self, ClientError::Encoding(_))
    }
}
