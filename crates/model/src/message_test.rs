//! Tests for the message model

use chrono::Utc;

use crate::{DecoderConfig, FullMessage, RawMessage, SyslogMessage, Uid, SKEWER_NAMESPACE};

fn raw() -> RawMessage {
    RawMessage {
        client: "198.51.100.7".into(),
        local_port: 2514,
        unix_socket_path: String::new(),
        conf_id: Uid::new(),
        conn_id: Uid::new(),
        txnr: Some(42),
        decoder: DecoderConfig::default(),
        data: b"<14>test".to_vec(),
    }
}

#[test]
fn from_parsed_attaches_labels() {
    let raw = raw();
    let fields = SyslogMessage {
        time_generated: Utc::now(),
        message: "hello".into(),
        ..Default::default()
    };
    let full = FullMessage::from_parsed(Uid::new(), &raw, fields);

    assert_eq!(
        full.fields.get_property(SKEWER_NAMESPACE, "client"),
        Some("198.51.100.7")
    );
    assert_eq!(
        full.fields.get_property(SKEWER_NAMESPACE, "localport"),
        Some("2514")
    );
    assert_eq!(full.fields.get_property(SKEWER_NAMESPACE, "socketpath"), None);
    assert_eq!(full.txnr, Some(42));
    assert_eq!(full.conn_id, raw.conn_id);
    assert_eq!(full.conf_id, raw.conf_id);
}

#[test]
fn serde_roundtrip() {
    let raw = raw();
    let mut fields = SyslogMessage::default();
    fields.message = "payload".into();
    fields
        .structured
        .entry("exampleSDID@32473".into())
        .or_default()
        .insert("iut".into(), "3".into());
    let full = FullMessage::from_parsed(Uid::new(), &raw, fields);

    let bytes = full.to_vec().unwrap();
    let back = FullMessage::from_slice(&bytes).unwrap();
    assert_eq!(back, full);
}

#[test]
fn recycle_clears_labels_and_payload() {
    let mut raw = raw();
    let capacity = raw.data.capacity();
    raw.recycle();
    assert!(raw.client.is_empty());
    assert!(raw.data.is_empty());
    assert_eq!(raw.txnr, None);
    assert!(raw.conf_id.is_zero());
    // the allocation must survive recycling
    assert_eq!(raw.data.capacity(), capacity);
}
