//! Kafka destination
//!
//! Messages are handed to the producer with their routing and correlation
//! metadata; delivery reports come back asynchronously and are settled by
//! a dedicated task. Broker errors that cannot heal (unknown topic, auth)
//! close the fatal channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use skewer_clients::{is_fatal_broker_error, DeliveryReport, KafkaProducer, MessageMeta};
use skewer_config::DestinationType;

use crate::{BaseDestination, DestEnv, DestError, Destination, OutputMsg};

pub struct KafkaDestination {
    base: Arc<BaseDestination>,
    producer: KafkaProducer,
}

impl KafkaDestination {
    pub async fn build(env: &DestEnv) -> Result<KafkaDestination, DestError> {
        let base = Arc::new(BaseDestination::new(DestinationType::Kafka, env));
        let (producer, reports) = match KafkaProducer::new(&env.config.kafka_dest) {
            Ok(pair) => {
                base.count_conn(true);
                pair
            }
            Err(e) => {
                base.count_conn(false);
                return Err(e.into());
            }
        };

        tokio::spawn(handle_reports(Arc::clone(&base), reports));

        Ok(KafkaDestination { base, producer })
    }
}

async fn handle_reports(
    base: Arc<BaseDestination>,
    mut reports: tokio::sync::mpsc::UnboundedReceiver<DeliveryReport>,
) {
    while let Some(report) = reports.recv().await {
        match report.error {
            None => {
                base.metrics().kafka_sent_total.inc();
                base.ack(report.meta.uid);
            }
            Some(error) => {
                tracing::info!(
                    error = %error,
                    txnr = ?report.meta.txnr,
                    "NACK from the broker"
                );
                base.nack(report.meta.uid);
                if is_fatal_broker_error(&error) {
                    base.dofatal();
                }
            }
        }
    }
}

#[async_trait]
impl Destination for KafkaDestination {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError> {
        for msg in msgs {
            let uid = msg.message.uid;
            let payload = match serde_json::to_vec(&msg.message.fields) {
                Ok(p) => p,
                Err(_) => {
                    self.base.permerr(uid);
                    continue;
                }
            };
            let meta = MessageMeta {
                uid,
                conn_id: msg.message.conn_id,
                txnr: msg.message.txnr,
            };
            let timestamp = msg.message.fields.best_time().timestamp_millis();
            self.producer.send(
                msg.topic,
                msg.partition_key,
                msg.partition,
                payload,
                timestamp,
                meta,
            );
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.producer.flush(std::time::Duration::from_secs(5));
    }

    fn fatal(&self) -> CancellationToken {
        self.base.fatal()
    }
}
