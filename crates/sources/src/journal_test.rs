//! Journald export-format tests

use std::collections::BTreeMap;
use std::io::Cursor;

use tokio::io::BufReader;

use crate::journal::{entry_to_message, read_entry};

async fn entries(input: &[u8]) -> Vec<BTreeMap<String, String>> {
    let mut reader = BufReader::new(Cursor::new(input.to_vec()));
    let mut out = Vec::new();
    while let Some(entry) = read_entry(&mut reader).await.unwrap() {
        out.push(entry);
    }
    out
}

#[tokio::test]
async fn text_entries() {
    let input = b"MESSAGE=first\nPRIORITY=6\n\nMESSAGE=second\n\n";
    let got = entries(input).await;
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].get("MESSAGE").map(String::as_str), Some("first"));
    assert_eq!(got[0].get("PRIORITY").map(String::as_str), Some("6"));
    assert_eq!(got[1].get("MESSAGE").map(String::as_str), Some("second"));
}

#[tokio::test]
async fn binary_field() {
    // MESSAGE as a binary field: name LF, le64 size, bytes, LF
    let mut input = Vec::new();
    input.extend_from_slice(b"MESSAGE\n");
    input.extend_from_slice(&(11u64).to_le_bytes());
    input.extend_from_slice(b"with\nnewlin");
    input.push(b'\n');
    input.extend_from_slice(b"PRIORITY=3\n\n");

    let got = entries(&input).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].get("MESSAGE").map(String::as_str), Some("with\nnewlin"));
    assert_eq!(got[0].get("PRIORITY").map(String::as_str), Some("3"));
}

#[tokio::test]
async fn entry_without_trailing_terminator_is_returned_at_eof() {
    let got = entries(b"MESSAGE=tail\n").await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].get("MESSAGE").map(String::as_str), Some("tail"));
}

#[test]
fn mapping_to_syslog_fields() {
    let mut fields = BTreeMap::new();
    fields.insert("MESSAGE".to_string(), "unit started".to_string());
    fields.insert("PRIORITY".to_string(), "5".to_string());
    fields.insert("SYSLOG_FACILITY".to_string(), "3".to_string());
    fields.insert("SYSLOG_IDENTIFIER".to_string(), "systemd".to_string());
    fields.insert("_PID".to_string(), "1".to_string());
    fields.insert("_HOSTNAME".to_string(), "node1".to_string());
    fields.insert("_SOURCE_REALTIME_TIMESTAMP".to_string(), "1700000000000000".to_string());
    fields.insert("_COMM".to_string(), "systemd".to_string());

    let msg = entry_to_message(fields);
    assert_eq!(msg.message, "unit started");
    assert_eq!(msg.severity, skewer_model::Severity::Notice);
    assert_eq!(msg.facility, skewer_model::Facility::Daemon);
    assert_eq!(msg.app_name, "systemd");
    assert_eq!(msg.proc_id, "1");
    assert_eq!(msg.host, "node1");
    assert!(msg.time_reported.is_some());
    assert_eq!(msg.get_property("journald", "_comm"), Some("systemd"));
}
