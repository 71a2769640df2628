//! Destination sections

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The destinations messages can be routed to.
///
/// Each variant also names the one-byte key namespace the store uses for
/// its per-destination bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Tcp,
    Udp,
    Http,
    File,
    Stderr,
    Relp,
    Kafka,
}

impl DestinationType {
    pub const ALL: [DestinationType; 7] = [
        DestinationType::Tcp,
        DestinationType::Udp,
        DestinationType::Http,
        DestinationType::File,
        DestinationType::Stderr,
        DestinationType::Relp,
        DestinationType::Kafka,
    ];

    /// The store key namespace for this destination.
    pub fn byte(self) -> u8 {
        match self {
            DestinationType::Tcp => 1,
            DestinationType::Udp => 2,
            DestinationType::Http => 3,
            DestinationType::File => 4,
            DestinationType::Stderr => 5,
            DestinationType::Relp => 6,
            DestinationType::Kafka => 7,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.byte() == b)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DestinationType::Tcp => "tcp",
            DestinationType::Udp => "udp",
            DestinationType::Http => "http",
            DestinationType::File => "file",
            DestinationType::Stderr => "stderr",
            DestinationType::Relp => "relp",
            DestinationType::Kafka => "kafka",
        }
    }
}

/// Retry/rebind settings shared by connection-oriented destinations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DestRetryConfig {
    /// Forced periodic reconnection; zero disables
    #[serde(with = "humantime_serde")]
    pub rebind: Duration,

    /// Connect attempts before the destination is declared dead
    pub retry_connect_max: u32,

    /// Initial back-off between connect attempts (doubled, capped at 60s)
    #[serde(with = "humantime_serde")]
    pub retry_connect_backoff: Duration,
}

impl Default for DestRetryConfig {
    fn default() -> Self {
        DestRetryConfig {
            rebind: Duration::ZERO,
            retry_connect_max: 10,
            retry_connect_backoff: Duration::from_secs(1),
        }
    }
}

/// `[tcp_dest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TcpDestConfig {
    pub host: String,
    pub port: u16,
    pub unix_socket_path: String,
    pub format: String,
    /// LF framing with `frame_delimiter` instead of octet counting
    pub line_framing: bool,
    pub frame_delimiter: String,
    pub keepalive: bool,
    #[serde(with = "humantime_serde")]
    pub keepalive_period: Duration,
    #[serde(with = "humantime_serde")]
    pub conn_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub flush_period: Duration,
    pub tls_enabled: bool,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
    pub insecure: bool,
    #[serde(flatten)]
    pub retry: DestRetryConfig,
}

impl Default for TcpDestConfig {
    fn default() -> Self {
        TcpDestConfig {
            host: "127.0.0.1".into(),
            port: 1514,
            unix_socket_path: String::new(),
            format: "rfc5424".into(),
            line_framing: true,
            frame_delimiter: "\n".into(),
            keepalive: true,
            keepalive_period: Duration::from_secs(30),
            conn_timeout: Duration::from_secs(10),
            flush_period: Duration::from_millis(100),
            tls_enabled: false,
            ca_file: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
            insecure: false,
            retry: DestRetryConfig::default(),
        }
    }
}

/// `[udp_dest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UdpDestConfig {
    pub host: String,
    pub port: u16,
    pub unix_socket_path: String,
    pub format: String,
}

impl Default for UdpDestConfig {
    fn default() -> Self {
        UdpDestConfig {
            host: "127.0.0.1".into(),
            port: 1514,
            unix_socket_path: String::new(),
            format: "rfc5424".into(),
        }
    }
}

/// `[http_dest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpDestConfig {
    pub url: String,
    pub method: String,
    pub content_type: String,
    pub format: String,
    #[serde(with = "humantime_serde")]
    pub conn_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub insecure: bool,
    #[serde(flatten)]
    pub retry: DestRetryConfig,
}

impl Default for HttpDestConfig {
    fn default() -> Self {
        HttpDestConfig {
            url: "http://127.0.0.1:8088/services/collector".into(),
            method: "POST".into(),
            content_type: "application/json".into(),
            format: "json".into(),
            conn_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            insecure: false,
            retry: DestRetryConfig::default(),
        }
    }
}

/// `[file_dest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileDestConfig {
    /// Filename template; `{field}` placeholders are filled per message
    pub filename_tmpl: String,
    pub format: String,
    /// Open files kept in the cache before the least recent is closed
    pub open_files_cache: usize,
    #[serde(with = "humantime_serde")]
    pub flush_period: Duration,
    pub sync: bool,
}

impl Default for FileDestConfig {
    fn default() -> Self {
        FileDestConfig {
            filename_tmpl: "/var/log/skewer/{hostname}.log".into(),
            format: "file".into(),
            open_files_cache: 128,
            flush_period: Duration::from_secs(1),
            sync: false,
        }
    }
}

/// `[stderr_dest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StderrDestConfig {
    pub format: String,
}

impl Default for StderrDestConfig {
    fn default() -> Self {
        StderrDestConfig {
            format: "file".into(),
        }
    }
}

/// `[relp_dest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelpDestConfig {
    pub host: String,
    pub port: u16,
    pub unix_socket_path: String,
    pub format: String,
    /// Unanswered txnrs tolerated before the client stops sending
    pub window_size: usize,
    #[serde(with = "humantime_serde")]
    pub conn_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub flush_period: Duration,
    #[serde(flatten)]
    pub retry: DestRetryConfig,
}

impl Default for RelpDestConfig {
    fn default() -> Self {
        RelpDestConfig {
            host: "127.0.0.1".into(),
            port: 2514,
            unix_socket_path: String::new(),
            format: "rfc5424".into(),
            window_size: 128,
            conn_timeout: Duration::from_secs(10),
            flush_period: Duration::from_millis(100),
            retry: DestRetryConfig::default(),
        }
    }
}

/// `[kafka_dest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KafkaDestConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub compression: String,
    /// rdkafka `request.required.acks`
    pub required_acks: i16,
    #[serde(with = "humantime_serde")]
    pub message_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub flush_frequency: Duration,
    pub message_bytes_max: usize,
    #[serde(flatten)]
    pub retry: DestRetryConfig,
}

impl Default for KafkaDestConfig {
    fn default() -> Self {
        KafkaDestConfig {
            brokers: vec!["127.0.0.1:9092".into()],
            client_id: "skewer".into(),
            compression: "snappy".into(),
            required_acks: -1,
            message_timeout: Duration::from_secs(30),
            flush_frequency: Duration::from_millis(500),
            message_bytes_max: 1_000_000,
            retry: DestRetryConfig::default(),
        }
    }
}
