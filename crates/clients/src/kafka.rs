//! Kafka producer wrapper
//!
//! Wraps an rdkafka `FutureProducer` behind the producer shape the rest of
//! skewer expects: fire-and-forget sends carrying per-message metadata,
//! with delivery reports arriving asynchronously on a channel. The RELP
//! engine matches reports back to `(conn_id, txnr)`; the dispatcher matches
//! them back to the stored uid.

use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::mpsc;

use skewer_config::KafkaDestConfig;
use skewer_model::Uid;

use crate::ClientError;

/// Per-message correlation data, returned untouched with the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMeta {
    pub uid: Uid,
    pub conn_id: Uid,
    pub txnr: Option<i32>,
}

/// One asynchronous delivery outcome.
#[derive(Debug)]
pub struct DeliveryReport {
    pub meta: MessageMeta,
    /// `None` on success
    pub error: Option<KafkaError>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct KafkaProducer {
    producer: FutureProducer,
    reports: mpsc::UnboundedSender<DeliveryReport>,
}

impl KafkaProducer {
    /// Build a producer; delivery reports arrive on the returned receiver.
    pub fn new(
        config: &KafkaDestConfig,
    ) -> Result<(KafkaProducer, mpsc::UnboundedReceiver<DeliveryReport>), ClientError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", &config.client_id)
            .set("compression.codec", &config.compression)
            .set("request.required.acks", config.required_acks.to_string())
            .set(
                "message.timeout.ms",
                config.message_timeout.as_millis().to_string(),
            )
            .set(
                "queue.buffering.max.ms",
                config.flush_frequency.as_millis().to_string(),
            )
            .set("message.max.bytes", config.message_bytes_max.to_string())
            .create()
            .map_err(|e| ClientError::Broker(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            KafkaProducer {
                producer,
                reports: tx,
            },
            rx,
        ))
    }

    /// Queue one message. The delivery outcome arrives later as a
    /// [`DeliveryReport`] carrying `meta`.
    pub fn send(
        &self,
        topic: String,
        partition_key: String,
        partition: Option<i32>,
        payload: Vec<u8>,
        timestamp_ms: i64,
        meta: MessageMeta,
    ) {
        let producer = self.producer.clone();
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let mut record = FutureRecord::to(&topic)
                .key(&partition_key)
                .payload(&payload)
                .timestamp(timestamp_ms)
                .headers(OwnedHeaders::new());
            if let Some(p) = partition {
                record = record.partition(p);
            }
            let outcome = producer
                .send(record, rdkafka::util::Timeout::Never)
                .await;
            let report = DeliveryReport {
                meta,
                error: outcome.err().map(|(e, _msg)| e),
            };
            // receiver gone means the destination is shutting down
            let _ = reports.send(report);
        });
    }

    /// Block until librdkafka's queues are drained (shutdown path).
    pub fn flush(&self, timeout: std::time::Duration) {
        use rdkafka::producer::Producer;
        let _ = self.producer.flush(rdkafka::util::Timeout::After(timeout));
    }
}

/// Broker errors that no amount of retrying will fix: the destination must
/// be torn down and rebuilt (or the operator has to act).
pub fn is_fatal_broker_error(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::UnknownTopic
                | RDKafkaErrorCode::UnknownTopicOrPartition
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
                | RDKafkaErrorCode::ClusterAuthorizationFailed
                | RDKafkaErrorCode::SaslAuthenticationFailed
                | RDKafkaErrorCode::InvalidTopic
                | RDKafkaErrorCode::MessageSizeTooLarge
        )
    )
}

impl Drop for KafkaProducer {
    fn drop(&mut self) {
        // a short drain keeps clean shutdowns from dropping queued messages
        self.flush(std::time::Duration::from_millis(500));
    }
}
