//! Parser pool tests

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use skewer_model::{DecoderConfig, Format, FullMessage, RawMessage, Uid, SKEWER_NAMESPACE};
use skewer_queue::Ring;

use crate::{ParserPool, RawMessagePool, SourceMetrics, StashOutcome, Stasher};

#[derive(Default)]
struct CollectingStasher {
    seen: Mutex<Vec<FullMessage>>,
}

impl Stasher for CollectingStasher {
    fn stash(&self, msg: FullMessage) -> StashOutcome {
        self.seen.lock().unwrap().push(msg);
        StashOutcome::Ok
    }
}

fn raw(frame: &[u8], format: Format) -> RawMessage {
    RawMessage {
        client: "203.0.113.5".into(),
        local_port: 2514,
        unix_socket_path: String::new(),
        conf_id: Uid::new(),
        conn_id: Uid::new(),
        txnr: None,
        decoder: DecoderConfig {
            format,
            charset: String::new(),
        },
        data: frame.to_vec(),
    }
}

#[test]
fn pool_parses_labels_and_stashes() {
    let ring = Arc::new(Ring::new(16));
    let pool = RawMessagePool::new(1024, 8);
    let stasher = Arc::new(CollectingStasher::default());
    let metrics = Arc::new(SourceMetrics::new());
    let fatal = CancellationToken::new();

    let workers = ParserPool::spawn(
        "tcp",
        2,
        Arc::clone(&ring),
        Arc::clone(&pool),
        stasher.clone() as Arc<dyn Stasher>,
        Arc::clone(&metrics),
        fatal.clone(),
    );

    ring.put(raw(b"<14>Oct 11 22:14:15 host app: hello", Format::Rfc3164))
        .unwrap();
    ring.put(raw(b"not a syslog frame at all", Format::Rfc5424))
        .unwrap();
    ring.dispose();
    workers.join();

    let seen = stasher.seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "bad frame is dropped, good one stashed");
    let msg = &seen[0];
    assert_eq!(msg.fields.message, "hello");
    assert!(!msg.uid.is_zero());
    assert_eq!(
        msg.fields.get_property(SKEWER_NAMESPACE, "client"),
        Some("203.0.113.5")
    );
    assert_eq!(
        msg.fields.get_property(SKEWER_NAMESPACE, "localport"),
        Some("2514")
    );

    assert_eq!(
        metrics
            .parsing_errors_total
            .with_label_values(&["tcp", "203.0.113.5", "rfc5424"])
            .get(),
        1
    );
    assert!(!fatal.is_cancelled());
}

struct FatalStasher;

impl Stasher for FatalStasher {
    fn stash(&self, _msg: FullMessage) -> StashOutcome {
        StashOutcome::Fatal
    }
}

#[test]
fn fatal_stash_raises_the_signal() {
    let ring = Arc::new(Ring::new(16));
    let pool = RawMessagePool::new(1024, 8);
    let metrics = Arc::new(SourceMetrics::new());
    let fatal = CancellationToken::new();

    let workers = ParserPool::spawn(
        "tcp",
        1,
        Arc::clone(&ring),
        pool,
        Arc::new(FatalStasher),
        metrics,
        fatal.clone(),
    );

    ring.put(raw(b"<14>Oct 11 22:14:15 h a: x", Format::Rfc3164))
        .unwrap();
    ring.dispose();
    workers.join();

    assert!(fatal.is_cancelled());
}
