//! Syslog TCP client tests

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use skewer_config::TcpDestConfig;
use skewer_model::{FullMessage, SyslogMessage, Uid};

use crate::SyslogTcpClient;

fn message(text: &str) -> FullMessage {
    FullMessage {
        uid: Uid::new(),
        conn_id: Uid::ZERO,
        conf_id: Uid::ZERO,
        txnr: None,
        fields: SyslogMessage {
            priority: 14,
            message: text.into(),
            host: "h".into(),
            app_name: "a".into(),
            time_generated: chrono::Utc::now(),
            ..Default::default()
        },
    }
}

async fn config_for(listener: &TcpListener, line_framing: bool) -> TcpDestConfig {
    let addr = listener.local_addr().unwrap();
    TcpDestConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        line_framing,
        format: "rfc5424".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn line_framed_send() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = SyslogTcpClient::new(config_for(&listener, true).await).unwrap();
    client.connect().await.unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();

    client.send(&message("hello")).await.unwrap();
    client.flush().await.unwrap();

    let mut buf = vec![0u8; 256];
    let n = peer.read(&mut buf).await.unwrap();
    let line = String::from_utf8_lossy(&buf[..n]).to_string();
    assert!(line.starts_with("<14>1 "), "line: {line}");
    assert!(line.ends_with("hello\n"), "line: {line}");
}

#[tokio::test]
async fn octet_counted_send() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = SyslogTcpClient::new(config_for(&listener, false).await).unwrap();
    client.connect().await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    client.send(&message("abc")).await.unwrap();
    client.flush().await.unwrap();

    let mut buf = vec![0u8; 256];
    let n = peer.read(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf[..n]).to_string();

    let (len_str, body) = text.split_once(' ').unwrap();
    let len: usize = len_str.parse().unwrap();
    assert_eq!(body.len(), len);
    assert!(body.ends_with("abc"));
}

#[tokio::test]
async fn connect_refused_is_reported() {
    let config = TcpDestConfig {
        host: "127.0.0.1".into(),
        port: 1, // nothing listens there
        ..Default::default()
    };
    let mut client = SyslogTcpClient::new(config).unwrap();
    assert!(client.connect().await.is_err());
    assert!(!client.is_connected());
}
