//! Destination dispatcher
//!
//! One worker per enabled destination. The worker consumes uids from the
//! destination's dispatch ring, loads the payload from the store, runs the
//! filter environment and drives the destination. When the destination
//! closes its fatal channel (connection dead, rebind elapsed, broker
//! refused) the worker tears it down and rebuilds it under the configured
//! retry budget; an exhausted budget leaves the destination dead until the
//! next reload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use skewer_config::{BaseConfig, DestRetryConfig, DestinationType, FilterEnv, FilterVerdict};
use skewer_model::{FullMessage, Uid, SKEWER_NAMESPACE};
use skewer_queue::Ring;
use skewer_store::MessageStore;

use crate::{build_destination, DestEnv, DestMetrics, Destination, OutputMsg};

const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(60);

pub struct Dispatcher {
    env: DestEnv,
    /// Filter environment per configuration block, with a default fallback
    filters: Arc<HashMap<Uid, FilterEnv>>,
    default_filter: Arc<FilterEnv>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<MessageStore>,
        config: Arc<BaseConfig>,
        metrics: Arc<DestMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let mut filters = HashMap::new();
        let listeners = config
            .tcp_sources
            .iter()
            .map(|s| &s.listener)
            .chain(config.udp_sources.iter().map(|s| &s.listener))
            .chain(config.relp_sources.iter().map(|s| &s.listener))
            .chain(config.directrelp_sources.iter().map(|s| &s.listener));
        for listener in listeners {
            filters.insert(listener.conf_id, FilterEnv::new(&listener.filter));
        }

        Dispatcher {
            env: DestEnv {
                store,
                config,
                metrics,
                cancel,
            },
            filters: Arc::new(filters),
            default_filter: Arc::new(FilterEnv::new(&Default::default())),
        }
    }

    /// Spawn one worker per destination the store fans out to.
    pub fn spawn_all(&self) -> Vec<JoinHandle<()>> {
        self.env
            .store
            .destinations()
            .into_iter()
            .map(|dest| self.spawn(dest))
            .collect()
    }

    fn spawn(&self, dest: DestinationType) -> JoinHandle<()> {
        let env = self.env.clone();
        let filters = Arc::clone(&self.filters);
        let default_filter = Arc::clone(&self.default_filter);
        tokio::spawn(async move {
            run_destination(env, filters, default_filter, dest).await;
        })
    }
}

fn retry_of(config: &BaseConfig, dest: DestinationType) -> DestRetryConfig {
    match dest {
        DestinationType::Tcp => config.tcp_dest.retry.clone(),
        DestinationType::Http => config.http_dest.retry.clone(),
        DestinationType::Relp => config.relp_dest.retry.clone(),
        DestinationType::Kafka => config.kafka_dest.retry.clone(),
        _ => DestRetryConfig::default(),
    }
}

async fn run_destination(
    env: DestEnv,
    filters: Arc<HashMap<Uid, FilterEnv>>,
    default_filter: Arc<FilterEnv>,
    dest: DestinationType,
) {
    let Some(ring) = env.store.ring(dest) else {
        tracing::error!(dest = dest.as_str(), "no dispatch ring for destination");
        return;
    };
    let retry = retry_of(&env.config, dest);
    let mut failed_attempts: u32 = 0;

    loop {
        if env.cancel.is_cancelled() {
            return;
        }

        let mut driver = match build_destination(dest, &env).await {
            Ok(driver) => {
                failed_attempts = 0;
                driver
            }
            Err(e) => {
                failed_attempts += 1;
                if failed_attempts > retry.retry_connect_max {
                    tracing::error!(
                        dest = dest.as_str(),
                        attempts = failed_attempts,
                        error = %e,
                        "retry budget exhausted, destination is dead until reload"
                    );
                    return;
                }
                let backoff = retry
                    .retry_connect_backoff
                    .saturating_mul(1 << (failed_attempts - 1).min(16))
                    .min(MAX_CONNECT_BACKOFF);
                tracing::warn!(
                    dest = dest.as_str(),
                    attempt = failed_attempts,
                    backoff = ?backoff,
                    error = %e,
                    "destination connect failed"
                );
                tokio::select! {
                    _ = env.cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }
        };

        tracing::info!(dest = dest.as_str(), "destination worker running");
        let outcome = worker_loop(&env, &filters, &default_filter, dest, &ring, &mut driver).await;
        driver.close().await;
        match outcome {
            WorkerExit::Shutdown => return,
            WorkerExit::Rebuild => {
                tracing::info!(dest = dest.as_str(), "rebuilding destination");
            }
        }
    }
}

enum WorkerExit {
    Shutdown,
    Rebuild,
}

async fn worker_loop(
    env: &DestEnv,
    filters: &HashMap<Uid, FilterEnv>,
    default_filter: &FilterEnv,
    dest: DestinationType,
    ring: &Ring<Uid>,
    driver: &mut Box<dyn Destination>,
) -> WorkerExit {
    let fatal = driver.fatal();
    loop {
        let uid = tokio::select! {
            _ = env.cancel.cancelled() => return WorkerExit::Shutdown,
            _ = fatal.cancelled() => return WorkerExit::Rebuild,
            uid = ring.get_async() => match uid {
                Ok(uid) => uid,
                Err(_) => return WorkerExit::Shutdown,
            },
        };

        let msg = match env.store.retrieve(uid) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue, // already settled everywhere
            Err(e) => {
                tracing::error!(error = %e, uid = %uid, "payload load failed");
                return WorkerExit::Shutdown;
            }
        };

        match filter_message(env, filters, default_filter, dest, &msg) {
            Some(output) => {
                if driver.send(vec![output]).await.is_err() {
                    return WorkerExit::Rebuild;
                }
            }
            None => continue,
        }
    }
}

/// Run the filter; settle dropped/rejected messages here and return the
/// routed output for passing ones.
fn filter_message(
    env: &DestEnv,
    filters: &HashMap<Uid, FilterEnv>,
    default_filter: &FilterEnv,
    dest: DestinationType,
    msg: &FullMessage,
) -> Option<OutputMsg> {
    let filter = filters.get(&msg.conf_id).unwrap_or(default_filter);
    let routing = filter.evaluate(&msg.fields);
    let client = msg
        .fields
        .get_property(SKEWER_NAMESPACE, "client")
        .unwrap_or("");
    env.metrics
        .filtering_total
        .with_label_values(&[routing.verdict.as_str(), client, dest.as_str()])
        .inc();

    match routing.verdict {
        FilterVerdict::Pass => Some(OutputMsg {
            message: msg.clone(),
            topic: routing.topic,
            partition_key: routing.partition_key,
            partition: routing.partition,
        }),
        FilterVerdict::Dropped => {
            // intentional discard counts as settled
            if let Err(e) = env.store.ack(msg.uid, dest) {
                tracing::error!(error = %e, "ack of dropped message failed");
            }
            env.metrics
                .ack_total
                .with_label_values(&[dest.as_str(), "ack"])
                .inc();
            None
        }
        FilterVerdict::Rejected => {
            if let Err(e) = env.store.permerr(msg.uid, dest) {
                tracing::error!(error = %e, "permerr of rejected message failed");
            }
            env.metrics
                .ack_total
                .with_label_values(&[dest.as_str(), "permerr"])
                .inc();
            None
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
