//! RELP client tests against a scripted peer

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use skewer_config::RelpDestConfig;
use skewer_model::{FullMessage, SyslogMessage, Uid};

use crate::RelpClient;

fn message() -> FullMessage {
    FullMessage {
        uid: Uid::new(),
        conn_id: Uid::ZERO,
        conf_id: Uid::ZERO,
        txnr: None,
        fields: SyslogMessage {
            priority: 14,
            message: "m".into(),
            time_generated: chrono::Utc::now(),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn open_send_and_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // scripted rsyslog-ish peer: ack open, then ack every syslog frame
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let open = lines.next_line().await.unwrap().unwrap();
        assert!(open.starts_with("1 open "), "got {open:?}");
        write_half.write_all(b"1 rsp 6 200 OK\n").await.unwrap();

        let frame = lines.next_line().await.unwrap().unwrap();
        assert!(frame.starts_with("2 syslog "), "got {frame:?}");
        write_half.write_all(b"2 rsp 6 200 OK\n").await.unwrap();
    });

    let config = RelpDestConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ..Default::default()
    };
    let mut client = RelpClient::new(config).unwrap();
    client.connect().await.unwrap();

    let txnr = client.send(&message()).await.unwrap();
    assert_eq!(txnr, 2);
    let (resp_txnr, ok) = client.next_response().await.unwrap();
    assert_eq!(resp_txnr, 2);
    assert!(ok);

    peer.await.unwrap();
}

#[tokio::test]
async fn refused_open_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let _ = lines.next_line().await;
        let _ = write_half.write_all(b"1 rsp 6 500 KO\n").await;
    });

    let config = RelpDestConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ..Default::default()
    };
    let mut client = RelpClient::new(config).unwrap();
    assert!(client.connect().await.is_err());
    assert!(!client.is_connected());
}
