//! Configuration snapshot tests

use std::time::Duration;

use crate::{BaseConfig, DestinationType};

#[test]
fn default_snapshot_installs_a_relp_listener() {
    let mut config = BaseConfig::default();
    config.complete().unwrap();

    assert_eq!(config.relp_sources.len(), 1);
    let listener = &config.relp_sources[0].listener;
    assert_eq!(listener.bind_addr, "127.0.0.1");
    assert_eq!(listener.port, 2514);
    assert_eq!(listener.format, "rfc5424");
    assert!(!listener.conf_id.is_zero());
}

#[test]
fn parse_full_snapshot() {
    let config = BaseConfig::parse(
        r#"
[main]
destinations = ["tcp", "stderr"]
max_input_message_size = 1024

[metrics]
port = 9100

[[tcp_source]]
bind_addr = "0.0.0.0"
port = 1514
format = "auto"
timeout = "30s"

[[udp_source]]
port = 514

[tcp_dest]
host = "logs.example.com"
port = 6514
rebind = "500ms"
"#,
    )
    .unwrap();

    assert_eq!(
        config.main.destinations,
        vec![DestinationType::Tcp, DestinationType::Stderr]
    );
    assert_eq!(config.main.max_input_message_size, 1024);
    assert_eq!(config.metrics.port, 9100);

    assert_eq!(config.tcp_sources.len(), 1);
    let tcp = &config.tcp_sources[0].listener;
    assert_eq!(tcp.port, 1514);
    assert_eq!(tcp.format, "auto");
    assert_eq!(tcp.timeout, Duration::from_secs(30));
    assert_eq!(tcp.binder_addr(true), "tcp:0.0.0.0:1514");
    // a default listener must not be added when sources exist
    assert!(config.relp_sources.is_empty());

    assert_eq!(config.udp_sources[0].listener.binder_addr(false), "udp:127.0.0.1:514");

    assert_eq!(config.tcp_dest.host, "logs.example.com");
    assert_eq!(config.tcp_dest.retry.rebind, Duration::from_millis(500));
    assert_eq!(config.tcp_dest.retry.retry_connect_max, 10);
}

#[test]
fn unknown_format_is_rejected() {
    let err = BaseConfig::parse(
        r#"
[[tcp_source]]
format = "xml"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("unknown decoder format"));
}

#[test]
fn conf_ids_are_unique_per_snapshot() {
    let config = BaseConfig::parse(
        r#"
[[tcp_source]]
port = 1514
[[tcp_source]]
port = 1515
"#,
    )
    .unwrap();
    let a = config.tcp_sources[0].listener.conf_id;
    let b = config.tcp_sources[1].listener.conf_id;
    assert_ne!(a, b);
    assert!(!a.is_zero());
}

#[test]
fn export_import_roundtrip() {
    let config = BaseConfig::parse(
        r#"
[main]
destinations = ["kafka"]
[[relp_source]]
port = 2514
"#,
    )
    .unwrap();
    let bytes = config.export().unwrap();
    let back = BaseConfig::import(&bytes).unwrap();
    assert_eq!(back, config);
}

#[test]
fn destination_bytes_are_stable_and_distinct() {
    let mut seen = std::collections::BTreeSet::new();
    for dest in DestinationType::ALL {
        assert!(seen.insert(dest.byte()), "{dest:?} byte collides");
        assert_eq!(DestinationType::from_byte(dest.byte()), Some(dest));
    }
    assert_eq!(DestinationType::from_byte(0), None);
}

#[test]
fn load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = BaseConfig::load(dir.path()).unwrap();
    assert_eq!(config.relp_sources.len(), 1);
}
