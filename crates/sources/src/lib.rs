//! Source services
//!
//! Each source service accepts input over one transport, demarcates
//! frames, and pushes raw messages into the shared raw ring. A pool of
//! parser workers (one per CPU) drains the ring, decodes, labels, and
//! stashes the resulting messages through the [`Stasher`].
//!
//! The RELP source additionally runs the per-connection transaction
//! engine: every `syslog` command is tracked until its stash (or broker
//! delivery, for direct RELP) settles, and answers are written back to the
//! client strictly in transaction order.

mod accounting;
mod common;
mod framer;
mod journal;
mod parser;
mod relp;
mod tcp;
mod udp;

pub use accounting::AccountingSource;
pub use common::{conn_labels, RawMessagePool, SourceMetrics, StashOutcome, Stasher};
pub use framer::{read_frame, FrameMode, FramerError};
pub use journal::JournalSource;
pub use parser::ParserPool;
pub use relp::{
    AckForwarder, ConnAcks, DirectRelpSink, RelpFrame, RelpParseError, RelpParser, RelpSource,
    RelpStasher,
};
pub use tcp::TcpSource;
pub use udp::UdpSource;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Binder(#[from] skewer_binder::BinderError),

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("the store rejected a message fatally")]
    StoreFatal,

    #[error("source configuration error: {0}")]
    Config(String),
}
