//! RELP engine tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skewer_binder::{server, BinderClient};
use skewer_config::BaseConfig;
use skewer_model::FullMessage;

use crate::relp::{write_responses, RelpParseError, RelpParser};
use crate::{AckForwarder, RelpSource, SourceMetrics, StashOutcome, Stasher};

// ------------------------------------------------------------------
// Frame parser
// ------------------------------------------------------------------

#[test]
fn parse_single_frame() {
    let mut parser = RelpParser::new(1024);
    let (consumed, frame) = parser.feed(b"1 open 4 data\n").unwrap();
    assert_eq!(consumed, 14);
    let frame = frame.unwrap();
    assert_eq!(frame.txnr, 1);
    assert_eq!(frame.command, "open");
    assert_eq!(frame.data, b"data");
}

#[test]
fn parse_across_split_input() {
    let mut parser = RelpParser::new(1024);
    let input = b"42 syslog 11 hello world\n";
    let mut frames = Vec::new();
    // feed one byte at a time
    for &b in input.iter() {
        let (consumed, frame) = parser.feed(&[b]).unwrap();
        assert_eq!(consumed, 1);
        if let Some(f) = frame {
            frames.push(f);
        }
    }
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].txnr, 42);
    assert_eq!(frames[0].command, "syslog");
    assert_eq!(frames[0].data, b"hello world");
}

#[test]
fn parse_zero_datalen() {
    let mut parser = RelpParser::new(1024);
    let (_, frame) = parser.feed(b"3 close 0\n").unwrap();
    let frame = frame.unwrap();
    assert_eq!(frame.txnr, 3);
    assert_eq!(frame.command, "close");
    assert!(frame.data.is_empty());
}

#[test]
fn parse_back_to_back_frames() {
    let mut parser = RelpParser::new(1024);
    let input = b"1 syslog 1 a\n2 syslog 1 b\n";
    let (consumed, first) = parser.feed(input).unwrap();
    assert_eq!(first.unwrap().txnr, 1);
    let (_, second) = parser.feed(&input[consumed..]).unwrap();
    assert_eq!(second.unwrap().txnr, 2);
}

#[test]
fn illegal_transitions_are_errors() {
    assert_eq!(
        RelpParser::new(64).feed(b"abc "),
        Err(RelpParseError::BadTxnr)
    );
    assert_eq!(
        RelpParser::new(64).feed(b"1 sys1og "),
        Err(RelpParseError::BadCommand)
    );
    assert_eq!(
        RelpParser::new(64).feed(b"1 syslog x"),
        Err(RelpParseError::BadDatalen)
    );
    assert_eq!(
        RelpParser::new(4).feed(b"1 syslog 100 "),
        Err(RelpParseError::Oversize(100))
    );
    assert_eq!(
        RelpParser::new(64).feed(b"1 syslog 1 ab"),
        Err(RelpParseError::BadTrailer)
    );
}

// ------------------------------------------------------------------
// Ordered response writer
// ------------------------------------------------------------------

#[tokio::test]
async fn answers_are_strictly_ordered() {
    let forwarder = AckForwarder::new();
    let (conn_id, acks) = forwarder.add_conn();

    // the client sent txnrs 1, 2, 3
    acks.received(1);
    acks.received(2);
    acks.received(3);

    let (write_half, read_half) = tokio::io::duplex(4096);
    let (_inline_tx, inline_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let metrics = Arc::new(SourceMetrics::new());
    let writer = tokio::spawn(write_responses(
        write_half,
        Arc::clone(&acks),
        inline_rx,
        Arc::clone(&metrics),
        "198.51.100.1".into(),
    ));

    // the downstream acks 2 before 1; 3 fails
    forwarder.forward_succ(conn_id, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    forwarder.forward_succ(conn_id, 1);
    forwarder.forward_fail(conn_id, 3);

    let mut lines = BufReader::new(read_half).lines();
    let first = lines.next_line().await.unwrap().unwrap();
    let second = lines.next_line().await.unwrap().unwrap();
    let third = lines.next_line().await.unwrap().unwrap();

    // 1 is answered before 2 even though 2 settled first
    assert_eq!(first, "1 rsp 6 200 OK");
    assert_eq!(second, "2 rsp 6 200 OK");
    assert_eq!(third, "3 rsp 6 500 KO");

    assert_eq!(
        metrics
            .relp_answers_total
            .with_label_values(&["200", "198.51.100.1"])
            .get(),
        2
    );
    assert_eq!(
        metrics
            .relp_answers_total
            .with_label_values(&["500", "198.51.100.1"])
            .get(),
        1
    );

    forwarder.remove_conn(conn_id);
    let _ = writer.await;
}

#[tokio::test]
async fn closed_connection_abandons_unanswered_txnrs() {
    let forwarder = AckForwarder::new();
    let (conn_id, acks) = forwarder.add_conn();
    acks.received(1);
    forwarder.remove_conn(conn_id);

    // verdicts arriving after the close are dropped silently
    forwarder.forward_succ(conn_id, 1);
    assert!(acks.succ.is_disposed());
}

// ------------------------------------------------------------------
// End to end over a real binder
// ------------------------------------------------------------------

#[derive(Default)]
struct OkStasher {
    seen: Mutex<Vec<FullMessage>>,
}

impl Stasher for OkStasher {
    fn stash(&self, msg: FullMessage) -> StashOutcome {
        self.seen.lock().unwrap().push(msg);
        StashOutcome::Ok
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test(flavor = "multi_thread")]
async fn relp_session_open_syslog_close() {
    let (client_end, server_end) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )
    .unwrap();
    let binder_thread = std::thread::spawn(move || server::run(vec![server_end]));
    let (binder, events) = BinderClient::new(client_end);

    let port = free_port();
    let config = BaseConfig::parse(&format!(
        r#"
[[relp_source]]
bind_addr = "127.0.0.1"
port = {port}
format = "rfc5424"
"#
    ))
    .unwrap();

    let stasher = Arc::new(OkStasher::default());
    let metrics = Arc::new(SourceMetrics::new());
    let forwarder = AckForwarder::new();
    let source = RelpSource::new(
        &config,
        binder.clone(),
        events,
        stasher.clone() as Arc<dyn Stasher>,
        forwarder,
        Arc::clone(&metrics),
    );
    let cancel = CancellationToken::new();
    let run = tokio::spawn(source.run(cancel.clone()));

    let mut conn = None;
    for _ in 0..100 {
        match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
            Ok(c) => {
                conn = Some(c);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let conn = conn.expect("listener reachable");
    let (read_half, mut write_half) = conn.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // open handshake
    write_half.write_all(b"1 open 14 relp_version=0\n").await.unwrap();
    let open_rsp = lines.next_line().await.unwrap().unwrap();
    assert!(open_rsp.starts_with("1 rsp "), "got {open_rsp:?}");
    assert!(open_rsp.contains("200 OK"), "got {open_rsp:?}");
    // the offer lines follow as part of the response data
    while let Some(line) = lines.next_line().await.unwrap() {
        if line.starts_with("commands=") {
            break;
        }
    }

    // three syslog frames
    for txnr in 2..=4 {
        let body = format!("<14>1 - host app - - - message {txnr}");
        let frame = format!("{txnr} syslog {} {}\n", body.len(), body);
        write_half.write_all(frame.as_bytes()).await.unwrap();
    }
    for txnr in 2..=4 {
        let rsp = lines.next_line().await.unwrap().unwrap();
        assert_eq!(rsp, format!("{txnr} rsp 6 200 OK"));
    }
    assert_eq!(stasher.seen.lock().unwrap().len(), 3);

    // an empty syslog frame is a valid empty message and gets an ACK
    write_half.write_all(b"5 syslog 0\n").await.unwrap();
    let empty_rsp = lines.next_line().await.unwrap().unwrap();
    assert_eq!(empty_rsp, "5 rsp 6 200 OK");
    assert_eq!(stasher.seen.lock().unwrap().len(), 3, "nothing new stashed");

    // close
    write_half.write_all(b"6 close 0\n").await.unwrap();
    let close_rsp = lines.next_line().await.unwrap().unwrap();
    assert_eq!(close_rsp, "6 rsp 0");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("source stops")
        .unwrap()
        .unwrap();
    let _ = binder.byebye();
    binder_thread.join().unwrap().unwrap();
}
