//! Source sections: listeners, parsers and filters

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skewer_model::Uid;

use crate::ConfigError;

/// Settings shared by every stream/packet listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Listen on a unix socket instead of an IP endpoint
    pub unix_socket_path: String,
    /// Decoder format: rfc3164, rfc5424, json, auto
    pub format: String,
    /// Idle timeout per connection; zero disables
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Split frames on `frame_delimiter` instead of syslog framing
    pub line_framing: bool,
    pub frame_delimiter: String,
    /// Secure-transport options, threaded through opaquely
    pub tls_enabled: bool,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,

    /// Filtering/routing hooks attached to this listener
    #[serde(flatten)]
    pub filter: FilterConfig,

    /// Snapshot-unique identifier, assigned by `complete()`. Serialized so
    /// the snapshot a child imports names the same listeners.
    #[serde(default)]
    pub conf_id: Uid,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            bind_addr: "127.0.0.1".into(),
            port: 2514,
            unix_socket_path: String::new(),
            format: "rfc5424".into(),
            timeout: Duration::from_secs(60),
            line_framing: false,
            frame_delimiter: "\n".into(),
            tls_enabled: false,
            ca_file: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
            filter: FilterConfig::default(),
            conf_id: Uid::ZERO,
        }
    }
}

impl ListenerConfig {
    pub fn complete(&mut self) -> Result<(), ConfigError> {
        if self.bind_addr.is_empty() {
            self.bind_addr = "127.0.0.1".into();
        }
        if self.port == 0 && self.unix_socket_path.is_empty() {
            self.port = 2514;
        }
        if self.format.is_empty() {
            self.format = "rfc5424".into();
        }
        self.format
            .parse::<skewer_model::Format>()
            .map_err(|e| ConfigError::Check(e.to_string()))?;
        if self.line_framing && self.frame_delimiter.is_empty() {
            return Err(ConfigError::Check(
                "frame_delimiter must not be empty with line_framing".into(),
            ));
        }
        self.filter.complete();
        if self.conf_id.is_zero() {
            self.conf_id = Uid::new();
        }
        Ok(())
    }

    /// The binder address string for this listener.
    pub fn binder_addr(&self, stream: bool) -> String {
        if !self.unix_socket_path.is_empty() {
            if stream {
                format!("unix:{}", self.unix_socket_path)
            } else {
                format!("unixgram:{}", self.unix_socket_path)
            }
        } else if stream {
            format!("tcp:{}:{}", self.bind_addr, self.port)
        } else {
            format!("udp:{}:{}", self.bind_addr, self.port)
        }
    }
}

/// Routing/filtering hooks, consumed by the filter environment as a pure
/// `(message) -> {topic, partition_key, partition, verdict}` function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub topic_tmpl: String,
    pub partition_key_tmpl: String,
    /// Opaque script bodies for the evaluation sandbox
    pub topic_func: String,
    pub partition_key_func: String,
    pub partition_number_func: String,
    pub filter_func: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            topic_tmpl: "rsyslog-{appname}".into(),
            partition_key_tmpl: "mypk-{hostname}".into(),
            topic_func: String::new(),
            partition_key_func: String::new(),
            partition_number_func: String::new(),
            filter_func: String::new(),
        }
    }
}

impl FilterConfig {
    fn complete(&mut self) {
        if self.topic_tmpl.is_empty() && self.topic_func.is_empty() {
            self.topic_tmpl = "rsyslog-{appname}".into();
        }
        if self.partition_key_tmpl.is_empty() && self.partition_key_func.is_empty() {
            self.partition_key_tmpl = "mypk-{hostname}".into();
        }
    }
}

/// `[[tcp_source]]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TcpSourceConfig {
    #[serde(flatten)]
    pub listener: ListenerConfig,
    /// Keepalive on accepted connections
    pub keepalive: bool,
}

/// `[[udp_source]]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UdpSourceConfig {
    #[serde(flatten)]
    pub listener: ListenerConfig,
}

/// `[[relp_source]]` and `[[directrelp_source]]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelpSourceConfig {
    #[serde(flatten)]
    pub listener: ListenerConfig,
}

/// `[journald]` - the local journald-style feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournaldConfig {
    pub enabled: bool,
    /// Path of the export-format stream (socket or file)
    pub path: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            path: "/run/skewer/journal-export".into(),
        }
    }
}

/// `[accounting]` - process accounting records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccountingConfig {
    pub enabled: bool,
    /// Path of the kernel accounting file
    pub path: String,
    /// Poll period for new records
    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        AccountingConfig {
            enabled: false,
            path: "/var/log/account/pacct".into(),
            period: Duration::from_secs(2),
        }
    }
}

/// `[[parser]]` - a named custom decoder backed by the script sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    pub name: String,
    /// Opaque script body for the evaluation sandbox
    pub func: String,
}
