//! Shared source plumbing: metrics, the stasher contract, the raw buffer
//! pool and connection labeling.

use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::{IntCounterVec, Opts, Registry};

use skewer_model::{FullMessage, RawMessage};

/// What happened to a stashed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashOutcome {
    /// Persisted (or queued toward the store child)
    Ok,
    /// Rejected non-fatally; the message is gone but the service lives on
    Refused,
    /// The store is broken; the service must raise its fatal signal
    Fatal,
}

/// Where parsed messages go. The network services hand this to their
/// parser pool; the implementation relays toward the store child.
pub trait Stasher: Send + Sync {
    fn stash(&self, msg: FullMessage) -> StashOutcome;
}

/// Source-side metric collectors, one set per service process.
pub struct SourceMetrics {
    pub registry: Registry,
    pub client_conn_total: IntCounterVec,
    pub incoming_msgs_total: IntCounterVec,
    pub parsing_errors_total: IntCounterVec,
    pub relp_answers_total: IntCounterVec,
    pub relp_protocol_errors_total: IntCounterVec,
}

impl SourceMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let client_conn_total = IntCounterVec::new(
            Opts::new("skw_client_conn_total", "number of client connections"),
            &["proto", "client", "port", "path"],
        )
        .expect("valid metric definition");
        let incoming_msgs_total = IntCounterVec::new(
            Opts::new("skw_incoming_msgs_total", "number of incoming messages"),
            &["proto", "client", "port", "path"],
        )
        .expect("valid metric definition");
        let parsing_errors_total = IntCounterVec::new(
            Opts::new("skw_parsing_errors_total", "number of message parsing errors"),
            &["proto", "client", "format"],
        )
        .expect("valid metric definition");
        let relp_answers_total = IntCounterVec::new(
            Opts::new(
                "skw_relp_answers_total",
                "number of RSP answers sent back to the RELP client",
            ),
            &["status", "client"],
        )
        .expect("valid metric definition");
        let relp_protocol_errors_total = IntCounterVec::new(
            Opts::new(
                "skw_relp_protocol_errors_total",
                "number of RELP protocol errors",
            ),
            &["client"],
        )
        .expect("valid metric definition");

        for collector in [
            &client_conn_total,
            &incoming_msgs_total,
            &parsing_errors_total,
            &relp_answers_total,
            &relp_protocol_errors_total,
        ] {
            registry
                .register(Box::new(collector.clone()))
                .expect("register");
        }

        SourceMetrics {
            registry,
            client_conn_total,
            incoming_msgs_total,
            parsing_errors_total,
            relp_answers_total,
            relp_protocol_errors_total,
        }
    }
}

impl Default for SourceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of reusable raw-message buffers.
///
/// Sized by the owner; a `get` beyond the high-water mark still allocates
/// (the pool bounds retained memory, not concurrency).
pub struct RawMessagePool {
    free: Mutex<Vec<RawMessage>>,
    buffer_capacity: usize,
    max_retained: usize,
}

impl RawMessagePool {
    pub fn new(buffer_capacity: usize, max_retained: usize) -> Arc<Self> {
        Arc::new(RawMessagePool {
            free: Mutex::new(Vec::new()),
            buffer_capacity,
            max_retained,
        })
    }

    pub fn get(&self) -> RawMessage {
        if let Some(mut raw) = self.free.lock().pop() {
            raw.recycle();
            return raw;
        }
        RawMessage {
            data: Vec::with_capacity(self.buffer_capacity),
            ..Default::default()
        }
    }

    pub fn put(&self, raw: RawMessage) {
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(raw);
        }
    }

    #[cfg(test)]
    pub(crate) fn retained(&self) -> usize {
        self.free.lock().len()
    }
}

/// Split a peer address into the labels attached to every message.
pub fn conn_labels(
    peer: Option<std::net::SocketAddr>,
    local: Option<std::net::SocketAddr>,
    socket_path: &str,
) -> (String, i32, String) {
    let client = peer
        .map(|p| p.ip().to_string())
        .unwrap_or_else(|| "localhost".to_string());
    let local_port = local.map(|l| l.port() as i32).unwrap_or(0);
    (client, local_port, socket_path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_recycles_and_bounds_retention() {
        let pool = RawMessagePool::new(128, 2);
        let mut a = pool.get();
        a.client = "x".into();
        a.data.extend_from_slice(b"abc");
        pool.put(a);
        pool.put(pool.get());
        pool.put(pool.get());
        assert_eq!(pool.retained(), 2);

        let recycled = pool.get();
        assert!(recycled.client.is_empty());
        assert!(recycled.data.is_empty());
    }

    #[test]
    fn labels_for_inet_and_unix() {
        let peer = "198.51.100.9:40000".parse().ok();
        let local = "127.0.0.1:2514".parse().ok();
        let (client, port, path) = conn_labels(peer, local, "");
        assert_eq!(client, "198.51.100.9");
        assert_eq!(port, 2514);
        assert!(path.is_empty());

        let (client, port, path) = conn_labels(None, None, "/run/skewer.sock");
        assert_eq!(client, "localhost");
        assert_eq!(port, 0);
        assert_eq!(path, "/run/skewer.sock");
    }
}
