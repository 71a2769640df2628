//! Decoder tests

use chrono::{Datelike, Timelike};

use crate::decoders::{decode, parse_priority};
use crate::{DecodeError, DecoderConfig, Facility, Format, Severity};

fn config(format: Format) -> DecoderConfig {
    DecoderConfig {
        format,
        charset: String::new(),
    }
}

#[test]
fn priority_header() {
    let (pri, rest) = parse_priority(b"<14>rest").unwrap();
    assert_eq!(pri, 14);
    assert_eq!(rest, b"rest");

    assert!(matches!(
        parse_priority(b"no header"),
        Err(DecodeError::BadPriority)
    ));
    assert!(matches!(
        parse_priority(b"<192>x"),
        Err(DecodeError::BadPriority)
    ));
    assert!(matches!(
        parse_priority(b"<>x"),
        Err(DecodeError::BadPriority)
    ));
}

#[test]
fn rfc3164_full_form() {
    let frame = b"<14>Oct 11 22:14:15 host app: hello";
    let msgs = decode(&config(Format::Rfc3164), frame).unwrap();
    assert_eq!(msgs.len(), 1);
    let m = &msgs[0];

    assert_eq!(m.facility, Facility::User);
    assert_eq!(m.severity, Severity::Info);
    assert_eq!(m.host, "host");
    assert_eq!(m.app_name, "app");
    assert_eq!(m.message, "hello");

    let ts = m.time_reported.unwrap();
    assert_eq!(ts.month(), 10);
    assert_eq!(ts.day(), 11);
    assert_eq!(ts.hour(), 22);
    assert_eq!(ts.minute(), 14);
    assert_eq!(ts.second(), 15);
}

#[test]
fn rfc3164_tag_with_pid() {
    let frame = b"<34>Oct 11 22:14:15 mymachine su[230]: 'su root' failed";
    let m = &decode(&config(Format::Rfc3164), frame).unwrap()[0];
    assert_eq!(m.facility, Facility::Auth);
    assert_eq!(m.severity, Severity::Crit);
    assert_eq!(m.app_name, "su");
    assert_eq!(m.proc_id, "230");
    assert_eq!(m.message, "'su root' failed");
}

#[test]
fn rfc3164_without_timestamp_keeps_body() {
    let frame = b"<13>something without time";
    let m = &decode(&config(Format::Rfc3164), frame).unwrap()[0];
    assert!(m.time_reported.is_none());
    assert!(m.host.is_empty());
    assert_eq!(m.message, "something without time");
}

#[test]
fn rfc5424_full_form() {
    let frame = b"<165>1 2003-10-11T22:14:15.003Z mymachine.example.com \
evntslog - ID47 [exampleSDID@32473 iut=\"3\" eventSource=\"Application\"] \
\xEF\xBB\xBFAn application event log entry";
    let m = &decode(&config(Format::Rfc5424), frame).unwrap()[0];

    assert_eq!(m.facility, Facility::Local4);
    assert_eq!(m.severity, Severity::Notice);
    assert_eq!(m.version, 1);
    assert_eq!(m.host, "mymachine.example.com");
    assert_eq!(m.app_name, "evntslog");
    assert!(m.proc_id.is_empty());
    assert_eq!(m.msg_id, "ID47");
    assert_eq!(m.message, "An application event log entry");

    let params = m.structured.get("exampleSDID@32473").unwrap();
    assert_eq!(params.get("iut").map(String::as_str), Some("3"));
    assert_eq!(
        params.get("eventSource").map(String::as_str),
        Some("Application")
    );
}

#[test]
fn rfc5424_nil_fields_and_no_message() {
    let frame = b"<34>1 - - - - - -";
    let m = &decode(&config(Format::Rfc5424), frame).unwrap()[0];
    assert!(m.time_reported.is_none());
    assert!(m.host.is_empty());
    assert!(m.structured.is_empty());
    assert!(m.message.is_empty());
}

#[test]
fn rfc5424_escaped_param_value() {
    let frame = br#"<34>1 - h a - - [x k="a\"b\\c\]d"] m"#;
    let m = &decode(&config(Format::Rfc5424), frame).unwrap()[0];
    assert_eq!(
        m.structured.get("x").unwrap().get("k").map(String::as_str),
        Some(r#"a"b\c]d"#)
    );
}

#[test]
fn rfc5424_rejects_wrong_version() {
    let frame = b"<34>2 - - - - - -";
    assert!(matches!(
        decode(&config(Format::Rfc5424), frame),
        Err(DecodeError::BadVersion(_))
    ));
}

#[test]
fn json_with_priority() {
    let frame = br#"{"priority":14,"host":"web1","message":"hi"}"#;
    let m = &decode(&config(Format::Json), frame).unwrap()[0];
    assert_eq!(m.facility, Facility::User);
    assert_eq!(m.severity, Severity::Info);
    assert_eq!(m.host, "web1");
    assert_eq!(m.message, "hi");
}

#[test]
fn json_defaults_to_user_notice() {
    let frame = br#"{"msg":"aliased"}"#;
    let m = &decode(&config(Format::Json), frame).unwrap()[0];
    assert_eq!(m.facility, Facility::User);
    assert_eq!(m.severity, Severity::Notice);
    assert_eq!(m.message, "aliased");
}

#[test]
fn auto_sniffs_both_flavors() {
    let m = &decode(&config(Format::Auto), b"<34>1 - - - - - - five").unwrap()[0];
    assert_eq!(m.version, 1);

    let m = &decode(&config(Format::Auto), b"<34>Oct 11 22:14:15 h a: three").unwrap()[0];
    assert_eq!(m.version, 0);
    assert_eq!(m.message, "three");
}
