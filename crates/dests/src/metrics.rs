//! Destination metrics registry

use prometheus::{Gauge, IntCounter, IntCounterVec, Opts, Registry};

/// All destination-side collectors, registered once per process.
pub struct DestMetrics {
    pub registry: Registry,
    pub ack_total: IntCounterVec,
    pub conn_total: IntCounterVec,
    pub fatal_total: IntCounterVec,
    pub http_status_total: IntCounterVec,
    pub kafka_sent_total: IntCounter,
    pub filtering_total: IntCounterVec,
    pub opened_files: Gauge,
}

impl DestMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ack_total = IntCounterVec::new(
            Opts::new("skw_dest_ack_total", "number of message acknowledgments"),
            &["dest", "status"],
        )
        .expect("valid metric definition");
        let conn_total = IntCounterVec::new(
            Opts::new("skw_dest_conn_total", "number of connections to remote service"),
            &["dest", "status"],
        )
        .expect("valid metric definition");
        let fatal_total = IntCounterVec::new(
            Opts::new("skw_dest_fatal_total", "number of destination fatal errors"),
            &["dest"],
        )
        .expect("valid metric definition");
        let http_status_total = IntCounterVec::new(
            Opts::new(
                "skw_http_status_total",
                "number of returned status codes for HTTP destination",
            ),
            &["host", "code"],
        )
        .expect("valid metric definition");
        let kafka_sent_total = IntCounter::new(
            "skw_dest_kafka_sent_total",
            "number of sent messages to kafka",
        )
        .expect("valid metric definition");
        let filtering_total = IntCounterVec::new(
            Opts::new(
                "skw_message_filtering_total",
                "number of filtered messages by status",
            ),
            &["status", "client", "destination"],
        )
        .expect("valid metric definition");
        let opened_files = Gauge::new(
            "skw_dest_opened_files_number",
            "number of opened files by the file destination",
        )
        .expect("valid metric definition");

        registry.register(Box::new(ack_total.clone())).expect("register");
        registry.register(Box::new(conn_total.clone())).expect("register");
        registry.register(Box::new(fatal_total.clone())).expect("register");
        registry
            .register(Box::new(http_status_total.clone()))
            .expect("register");
        registry
            .register(Box::new(kafka_sent_total.clone()))
            .expect("register");
        registry
            .register(Box::new(filtering_total.clone()))
            .expect("register");
        registry.register(Box::new(opened_files.clone())).expect("register");

        DestMetrics {
            registry,
            ack_total,
            conn_total,
            fatal_total,
            http_status_total,
            kafka_sent_total,
            filtering_total,
            opened_files,
        }
    }
}

impl Default for DestMetrics {
    fn default() -> Self {
        Self::new()
    }
}
