//! Message types
//!
//! A frame moves through three shapes on its way to a destination:
//! `RawMessage` (bytes + connection labels) is produced by a listener,
//! `SyslogMessage` is the decoded structured form, and `FullMessage` wraps
//! the decoded message with the identifiers the store and the RELP engine
//! need.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Facility, Severity, Uid};

/// Property namespace used for labels added by the collector itself.
pub const SKEWER_NAMESPACE: &str = "skewer";

/// Decoder formats understood by the parser pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// BSD syslog (RFC 3164)
    Rfc3164,
    /// IETF syslog (RFC 5424)
    #[default]
    Rfc5424,
    /// One JSON object per frame
    Json,
    /// Sniff RFC 5424 vs RFC 3164 from the frame
    Auto,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Rfc3164 => "rfc3164",
            Format::Rfc5424 => "rfc5424",
            Format::Json => "json",
            Format::Auto => "auto",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = crate::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfc3164" | "3164" | "bsd" => Ok(Format::Rfc3164),
            "rfc5424" | "5424" | "ietf" => Ok(Format::Rfc5424),
            "json" => Ok(Format::Json),
            "auto" | "" => Ok(Format::Auto),
            other => Err(crate::DecodeError::UnknownFormat(other.to_string())),
        }
    }
}

/// Decoder selection carried by every raw message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DecoderConfig {
    pub format: Format,
    /// Charset for formats that are not UTF-8 clean; currently informational.
    #[serde(default)]
    pub charset: String,
}

/// An undecoded frame, as demarcated by a listener.
///
/// Owned by the raw ring between demarcation and parse; recycled into the
/// listener's buffer pool afterwards.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    /// Client address, empty for local feeds
    pub client: String,
    /// Local port the frame arrived on, 0 for unix sockets
    pub local_port: i32,
    /// Unix socket path the frame arrived on, empty otherwise
    pub unix_socket_path: String,
    /// Configuration block that produced the listener
    pub conf_id: Uid,
    /// Connection the frame belongs to (zero for packet listeners)
    pub conn_id: Uid,
    /// RELP transaction number, if the frame came in over RELP
    pub txnr: Option<i32>,
    /// Decoder to apply
    pub decoder: DecoderConfig,
    /// The frame payload
    pub data: Vec<u8>,
}

impl RawMessage {
    /// Reset labels and truncate the payload so the allocation can be reused.
    pub fn recycle(&mut self) {
        self.client.clear();
        self.local_port = 0;
        self.unix_socket_path.clear();
        self.conf_id = Uid::ZERO;
        self.conn_id = Uid::ZERO;
        self.txnr = None;
        self.data.clear();
    }
}

/// The parsed, common structured form of a syslog message.
///
/// Immutable after parse apart from `properties`, which the pipeline uses to
/// attach labels (client IP, local port, socket path) under the
/// [`SKEWER_NAMESPACE`] namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyslogMessage {
    pub priority: i32,
    pub facility: Facility,
    pub severity: Severity,
    pub version: i32,
    pub time_reported: Option<DateTime<Utc>>,
    pub time_generated: DateTime<Utc>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub proc_id: String,
    #[serde(default)]
    pub msg_id: String,
    /// RFC 5424 structured data: SD-ID -> (param name -> param value)
    #[serde(default)]
    pub structured: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub message: String,
    /// Pipeline-attached labels: namespace -> (key -> value)
    #[serde(default)]
    pub properties: BTreeMap<String, BTreeMap<String, String>>,
}

impl SyslogMessage {
    pub fn set_property(&mut self, namespace: &str, key: &str, value: impl Into<String>) {
        self.properties
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get_property(&self, namespace: &str, key: &str) -> Option<&str> {
        self.properties
            .get(namespace)?
            .get(key)
            .map(String::as_str)
    }

    /// The time to report downstream: the sender's timestamp when it parsed,
    /// the reception timestamp otherwise.
    pub fn best_time(&self) -> DateTime<Utc> {
        self.time_reported.unwrap_or(self.time_generated)
    }
}

/// The unit that flows through store and destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FullMessage {
    pub uid: Uid,
    pub conn_id: Uid,
    pub conf_id: Uid,
    /// RELP transaction number; populated only for RELP-sourced messages.
    #[serde(default)]
    pub txnr: Option<i32>,
    pub fields: SyslogMessage,
}

impl FullMessage {
    /// Wrap a parsed message, carrying the raw message's provenance over.
    pub fn from_parsed(uid: Uid, raw: &RawMessage, mut fields: SyslogMessage) -> Self {
        if !raw.client.is_empty() {
            fields.set_property(SKEWER_NAMESPACE, "client", raw.client.clone());
        }
        if raw.local_port != 0 {
            fields.set_property(SKEWER_NAMESPACE, "localport", raw.local_port.to_string());
        }
        if !raw.unix_socket_path.is_empty() {
            fields.set_property(SKEWER_NAMESPACE, "socketpath", raw.unix_socket_path.clone());
        }
        FullMessage {
            uid,
            conn_id: raw.conn_id,
            conf_id: raw.conf_id,
            txnr: raw.txnr,
            fields,
        }
    }

    /// Serialize for persistence. The store seals this buffer before writing.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// What a source service is listening on, reported to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerInfo {
    pub proto: String,
    pub bind_addr: String,
    pub port: u16,
    #[serde(default)]
    pub unix_socket_path: String,
}

impl ListenerInfo {
    pub fn tcp(addr: IpAddr, port: u16) -> Self {
        ListenerInfo {
            proto: "tcp".into(),
            bind_addr: addr.to_string(),
            port,
            unix_socket_path: String::new(),
        }
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;
