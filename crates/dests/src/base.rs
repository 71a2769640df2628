//! Base destination plumbing
//!
//! The shared half of every driver: acknowledgement callbacks wired into
//! the store (with their counters), the close-once fatal channel, and the
//! rebind timer.

use std::sync::{Arc, Once};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use skewer_config::{BaseConfig, DestinationType};
use skewer_model::Uid;
use skewer_store::MessageStore;

use crate::DestMetrics;

/// Everything a driver needs from its surroundings.
#[derive(Clone)]
pub struct DestEnv {
    pub store: Arc<MessageStore>,
    pub config: Arc<BaseConfig>,
    pub metrics: Arc<DestMetrics>,
    /// Service-level cancellation (reload/shutdown)
    pub cancel: CancellationToken,
}

/// The common state embedded in every driver.
pub struct BaseDestination {
    dest: DestinationType,
    env: DestEnv,
    fatal: CancellationToken,
    fatal_once: Arc<Once>,
}

impl BaseDestination {
    pub fn new(dest: DestinationType, env: &DestEnv) -> Self {
        let base = BaseDestination {
            dest,
            env: env.clone(),
            fatal: CancellationToken::new(),
            fatal_once: Arc::new(Once::new()),
        };
        base.start_rebind_timer();
        base
    }

    pub fn dest(&self) -> DestinationType {
        self.dest
    }

    pub fn codename(&self) -> &'static str {
        self.dest.as_str()
    }

    pub fn metrics(&self) -> &DestMetrics {
        &self.env.metrics
    }

    pub fn fatal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Close the fatal channel. Idempotent; counted once.
    pub fn dofatal(&self) {
        let metrics = Arc::clone(&self.env.metrics);
        let dest = self.dest;
        let fatal = self.fatal.clone();
        self.fatal_once.call_once(move || {
            metrics.fatal_total.with_label_values(&[dest.as_str()]).inc();
            fatal.cancel();
        });
    }

    fn rebind(&self) -> Duration {
        let retry = match self.dest {
            DestinationType::Tcp => &self.env.config.tcp_dest.retry,
            DestinationType::Http => &self.env.config.http_dest.retry,
            DestinationType::Relp => &self.env.config.relp_dest.retry,
            DestinationType::Kafka => &self.env.config.kafka_dest.retry,
            _ => return Duration::ZERO,
        };
        retry.rebind
    }

    /// Schedule a forced reconnection when `rebind` is configured.
    fn start_rebind_timer(&self) {
        let rebind = self.rebind();
        if rebind.is_zero() {
            return;
        }
        let cancel = self.env.cancel.clone();
        let fatal = self.fatal.clone();
        let once = Arc::clone(&self.fatal_once);
        let metrics = Arc::clone(&self.env.metrics);
        let dest = self.dest;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = fatal.cancelled() => {}
                _ = tokio::time::sleep(rebind) => {
                    tracing::info!(dest = dest.as_str(), rebind = ?rebind,
                        "rebind period expired, re-establishing destination");
                    once.call_once(|| {
                        metrics.fatal_total.with_label_values(&[dest.as_str()]).inc();
                        fatal.cancel();
                    });
                }
            }
        });
    }

    pub fn ack(&self, uid: Uid) {
        if let Err(e) = self.env.store.ack(uid, self.dest) {
            tracing::error!(error = %e, uid = %uid, "ack failed");
        }
        self.env
            .metrics
            .ack_total
            .with_label_values(&[self.codename(), "ack"])
            .inc();
    }

    pub fn nack(&self, uid: Uid) {
        if let Err(e) = self.env.store.nack(uid, self.dest) {
            tracing::error!(error = %e, uid = %uid, "nack failed");
        }
        self.env
            .metrics
            .ack_total
            .with_label_values(&[self.codename(), "nack"])
            .inc();
    }

    pub fn permerr(&self, uid: Uid) {
        if let Err(e) = self.env.store.permerr(uid, self.dest) {
            tracing::error!(error = %e, uid = %uid, "permerr failed");
        }
        self.env
            .metrics
            .ack_total
            .with_label_values(&[self.codename(), "permerr"])
            .inc();
    }

    pub fn count_conn(&self, success: bool) {
        let status = if success { "success" } else { "fail" };
        self.env
            .metrics
            .conn_total
            .with_label_values(&[self.codename(), status])
            .inc();
    }
}
