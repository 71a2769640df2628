//! Configuration for skewer
//!
//! A [`BaseConfig`] is an immutable snapshot: the configuration service
//! loads it from TOML, applies defaults and validation with
//! [`BaseConfig::complete`], and publishes it to the supervisor. A reload
//! produces a brand-new snapshot that atomically replaces the previous one;
//! the store path is pinned across reloads (it never changes mid-run).
//!
//! Example:
//!
//! ```toml
//! [main]
//! destinations = ["stderr"]
//!
//! [[tcp_source]]
//! bind_addr = "127.0.0.1"
//! port = 2514
//! format = "rfc5424"
//! ```

mod dests;
mod error;
pub mod filter;
mod global;
mod sources;
mod watch;

pub use dests::{
    DestRetryConfig, DestinationType, FileDestConfig, HttpDestConfig, KafkaDestConfig,
    RelpDestConfig, StderrDestConfig, TcpDestConfig, UdpDestConfig,
};
pub use error::ConfigError;
pub use filter::{FilterEnv, FilterVerdict, Routing};
pub use global::{MainConfig, MetricsConfig, StoreConfig};
pub use sources::{
    AccountingConfig, FilterConfig, JournaldConfig, ListenerConfig, ParserConfig,
    RelpSourceConfig, TcpSourceConfig, UdpSourceConfig,
};
pub use watch::{ConfigWatcher, FileOverlayWatcher, WatchEvent};

use std::path::Path;

use serde::{Deserialize, Serialize};

/// One immutable configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaseConfig {
    pub main: MainConfig,
    pub metrics: MetricsConfig,
    pub store: StoreConfig,

    #[serde(rename = "tcp_source")]
    pub tcp_sources: Vec<TcpSourceConfig>,
    #[serde(rename = "udp_source")]
    pub udp_sources: Vec<UdpSourceConfig>,
    #[serde(rename = "relp_source")]
    pub relp_sources: Vec<RelpSourceConfig>,
    #[serde(rename = "directrelp_source")]
    pub directrelp_sources: Vec<RelpSourceConfig>,
    pub journald: JournaldConfig,
    pub accounting: AccountingConfig,

    #[serde(rename = "parser")]
    pub parsers: Vec<ParserConfig>,

    pub tcp_dest: TcpDestConfig,
    pub udp_dest: UdpDestConfig,
    pub http_dest: HttpDestConfig,
    pub file_dest: FileDestConfig,
    pub stderr_dest: StderrDestConfig,
    pub relp_dest: RelpDestConfig,
    pub kafka_dest: KafkaDestConfig,
}

impl BaseConfig {
    /// Load, merge defaults and validate one snapshot from a config
    /// directory. The file is `<dir>/skewer.toml`; a missing file yields
    /// the default configuration (one RELP listener on 127.0.0.1:2514).
    pub fn load(dir: &Path) -> Result<BaseConfig, ConfigError> {
        let path = dir.join("skewer.toml");
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&text).map_err(|e| ConfigError::Syntax {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            tracing::info!(path = %path.display(), "no configuration file, using defaults");
            BaseConfig::default()
        };
        config.complete()?;
        Ok(config)
    }

    /// Parse a snapshot from a TOML string (tests, overlays).
    pub fn parse(text: &str) -> Result<BaseConfig, ConfigError> {
        let mut config: BaseConfig = toml::from_str(text).map_err(|e| ConfigError::Syntax {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.complete()?;
        Ok(config)
    }

    /// Fill defaults, validate, and assign a fresh `conf_id` to every
    /// source block. Mirrors what senders rely on: when no source at all is
    /// configured, a single RELP listener on 127.0.0.1:2514 is installed.
    pub fn complete(&mut self) -> Result<(), ConfigError> {
        if self.tcp_sources.is_empty()
            && self.udp_sources.is_empty()
            && self.relp_sources.is_empty()
            && self.directrelp_sources.is_empty()
            && !self.journald.enabled
            && !self.accounting.enabled
        {
            self.relp_sources.push(RelpSourceConfig::default());
        }

        for source in &mut self.tcp_sources {
            source.listener.complete()?;
        }
        for source in &mut self.udp_sources {
            source.listener.complete()?;
        }
        for source in &mut self.relp_sources {
            source.listener.complete()?;
        }
        for source in &mut self.directrelp_sources {
            source.listener.complete()?;
        }

        self.main.complete()?;
        Ok(())
    }

    /// The set of enabled destinations, in declaration order.
    pub fn enabled_destinations(&self) -> &[DestinationType] {
        &self.main.destinations
    }

    /// Serialize the snapshot for transfer over the IPC channel.
    pub fn export(&self) -> Result<Vec<u8>, ConfigError> {
        serde_json::to_vec(self).map_err(|e| ConfigError::Export(e.to_string()))
    }

    pub fn import(bytes: &[u8]) -> Result<BaseConfig, ConfigError> {
        serde_json::from_slice(bytes).map_err(|e| ConfigError::Export(e.to_string()))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
