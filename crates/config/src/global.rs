//! Global sections: `[main]`, `[metrics]`, `[store]`

use serde::{Deserialize, Serialize};

use crate::{ConfigError, DestinationType};

/// `[main]` - process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MainConfig {
    /// Destinations every stashed message is routed to
    pub destinations: Vec<DestinationType>,

    /// Upper bound on one input frame; larger frames close the connection
    pub max_input_message_size: usize,

    /// Capacity of the raw and parsed rings
    pub input_queue_size: usize,

    /// Capacity of each per-destination dispatch ring
    pub dest_queue_size: usize,

    /// Seal child->parent IPC frames (disabled only in tests)
    pub encrypt_ipc: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        MainConfig {
            destinations: vec![DestinationType::Stderr],
            max_input_message_size: 65536,
            input_queue_size: 8192,
            dest_queue_size: 8192,
            encrypt_ipc: true,
        }
    }
}

impl MainConfig {
    pub fn complete(&mut self) -> Result<(), ConfigError> {
        if self.destinations.is_empty() {
            self.destinations.push(DestinationType::Stderr);
        }
        if self.max_input_message_size == 0 {
            return Err(ConfigError::Check(
                "main.max_input_message_size must be positive".into(),
            ));
        }
        if self.input_queue_size == 0 || self.dest_queue_size == 0 {
            return Err(ConfigError::Check("queue sizes must be positive".into()));
        }
        Ok(())
    }
}

/// `[metrics]` - the Prometheus scrape endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: true,
            listen_addr: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// `[store]` - the durable queue location.
///
/// The directory is pinned for the lifetime of the process: reloads never
/// move the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub dirname: String,

    /// How often the sweeper rescans `ready` keys, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            dirname: "/var/lib/skewer/store".into(),
            sweep_interval_secs: 5,
        }
    }
}
