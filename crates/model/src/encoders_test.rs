//! Encoder tests, including the canonical round-trip laws

use crate::decoders::decode;
use crate::encoders::{encode, EncodingFormat};
use crate::{DecoderConfig, Format, FullMessage, SyslogMessage, Uid};

fn sample() -> FullMessage {
    let frame = b"<165>1 2003-10-11T22:14:15.003Z mymachine.example.com \
evntslog 123 ID47 [exampleSDID@32473 iut=\"3\"] An application event";
    let fields = decode(
        &DecoderConfig {
            format: Format::Rfc5424,
            charset: String::new(),
        },
        frame,
    )
    .unwrap()
    .remove(0);
    FullMessage {
        uid: Uid::new(),
        conn_id: Uid::ZERO,
        conf_id: Uid::ZERO,
        txnr: None,
        fields,
    }
}

#[test]
fn rfc5424_roundtrip_canonical_form() {
    let msg = sample();
    let encoded = encode(EncodingFormat::Rfc5424, &msg).unwrap();
    let reparsed = decode(
        &DecoderConfig {
            format: Format::Rfc5424,
            charset: String::new(),
        },
        &encoded,
    )
    .unwrap()
    .remove(0);

    assert_eq!(reparsed.priority, msg.fields.priority);
    assert_eq!(reparsed.time_reported, msg.fields.time_reported);
    assert_eq!(reparsed.host, msg.fields.host);
    assert_eq!(reparsed.app_name, msg.fields.app_name);
    assert_eq!(reparsed.proc_id, msg.fields.proc_id);
    assert_eq!(reparsed.msg_id, msg.fields.msg_id);
    assert_eq!(reparsed.structured, msg.fields.structured);
    assert_eq!(reparsed.message, msg.fields.message);

    // a second encode of the reparsed message is byte-identical
    let full2 = FullMessage {
        fields: reparsed,
        ..msg.clone()
    };
    assert_eq!(encode(EncodingFormat::Rfc5424, &full2).unwrap(), encoded);
}

#[test]
fn rfc3164_roundtrip_canonical_form() {
    let frame = b"<14>Oct 11 22:14:15 host app: hello";
    let fields = decode(
        &DecoderConfig {
            format: Format::Rfc3164,
            charset: String::new(),
        },
        frame,
    )
    .unwrap()
    .remove(0);
    let msg = FullMessage {
        uid: Uid::new(),
        conn_id: Uid::ZERO,
        conf_id: Uid::ZERO,
        txnr: None,
        fields,
    };

    let encoded = encode(EncodingFormat::Rfc3164, &msg).unwrap();
    let reparsed = decode(
        &DecoderConfig {
            format: Format::Rfc3164,
            charset: String::new(),
        },
        &encoded,
    )
    .unwrap()
    .remove(0);

    assert_eq!(reparsed.priority, msg.fields.priority);
    assert_eq!(reparsed.host, msg.fields.host);
    assert_eq!(reparsed.app_name, msg.fields.app_name);
    assert_eq!(reparsed.message, msg.fields.message);
    assert_eq!(reparsed.time_reported, msg.fields.time_reported);
}

#[test]
fn json_encoding_contains_fields() {
    let msg = sample();
    let encoded = encode(EncodingFormat::Json, &msg).unwrap();
    let v: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
    assert_eq!(v["host"], "mymachine.example.com");
    assert_eq!(v["app_name"], "evntslog");
}

#[test]
fn unknown_format_is_an_error() {
    assert!(EncodingFormat::parse("avro").is_err());
    assert_eq!(
        EncodingFormat::parse("5424").unwrap(),
        EncodingFormat::Rfc5424
    );
}
