//! Socket binder
//!
//! The binder is the one process that keeps its bind privileges after
//! everything else has dropped them. Services ask it to listen on their
//! behalf over a seqpacket socket pair; accepted connections and bound
//! packet sockets travel back as file descriptors attached with
//! `SCM_RIGHTS`.
//!
//! The binder retains every descriptor it hands out until it receives an
//! explicit `closeconn` - that retention is what lets a source service be
//! restarted without losing in-flight connections.
//!
//! Protocol (one seqpacket datagram per message):
//!
//! | direction | message |
//! |---|---|
//! | client -> binder | `listen <addr>...`, `stoplisten <addr>`, `closeconn <uid>`, `reset`, `byebye` |
//! | binder -> client | `newconn <uid> <addr>` (+fd), `error <addr> <msg>`, `stopped <addr>` |
//!
//! Addresses: `tcp:host:port`, `udp:host:port`, `unix:/path`,
//! `unixgram:/path`, `unixpacket:/path`.

mod addr;
mod client;
pub mod server;

pub use addr::{BinderAddr, Scheme};
pub use client::{
    into_tcp_stream, into_udp_socket, into_unix_stream, BinderClient, BinderEvent,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BinderError {
    #[error("invalid binder address: {0}")]
    BadAddress(String),

    #[error("binder socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binder protocol error: {0}")]
    Protocol(String),

    #[error("binder channel closed")]
    Closed,
}
