//! In-process data-plane integration test
//!
//! Wires the real components together without the process separation: a
//! binder-backed TCP source stashes into a real store, the dispatcher
//! drives a TCP destination, and the message arrives at a scripted peer.

use std::sync::Arc;
use std::time::Duration;

use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use skewer_binder::{server, BinderClient};
use skewer_config::{BaseConfig, DestinationType};
use skewer_dests::{DestMetrics, Dispatcher};
use skewer_model::FullMessage;
use skewer_sources::{SourceMetrics, StashOutcome, Stasher, TcpSource};
use skewer_store::MessageStore;

/// Stashes straight into the store, as the store child does after the
/// relay.
struct StoreStasher {
    store: Arc<MessageStore>,
}

impl Stasher for StoreStasher {
    fn stash(&self, msg: FullMessage) -> StashOutcome {
        match self.store.stash(&msg) {
            Ok(_) => StashOutcome::Ok,
            Err(_) => StashOutcome::Fatal,
        }
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
async fn tcp_to_tcp_end_to_end() {
    // downstream syslog server
    let downstream = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let downstream_addr = downstream.local_addr().unwrap();
    let received = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    let received_clone = Arc::clone(&received);
    tokio::spawn(async move {
        loop {
            let (conn, _) = match downstream.accept().await {
                Ok(c) => c,
                Err(_) => return,
            };
            let received = Arc::clone(&received_clone);
            tokio::spawn(async move {
                let mut lines = BufReader::new(conn).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    received.lock().await.push(line);
                }
            });
        }
    });

    // configuration: one TCP listener in, one TCP destination out
    let listen_port = free_port();
    let config = BaseConfig::parse(&format!(
        r#"
[main]
destinations = ["tcp"]
max_input_message_size = 8192

[[tcp_source]]
bind_addr = "127.0.0.1"
port = {listen_port}
format = "rfc3164"

[tcp_dest]
host = "127.0.0.1"
port = {dest_port}
format = "rfc5424"
line_framing = true
flush_period = "10ms"
"#,
        dest_port = downstream_addr.port(),
    ))
    .unwrap();
    let config = Arc::new(config);

    // store + dispatcher
    let store_dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(
        store_dir.path(),
        &[DestinationType::Tcp],
        256,
        XChaCha20Poly1305::new((&[9u8; 32]).into()),
    )
    .unwrap();
    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::new(DestMetrics::new()),
        cancel.clone(),
    );
    let dispatch_handles = dispatcher.spawn_all();

    // binder + source
    let (client_end, server_end) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )
    .unwrap();
    let binder_thread = std::thread::spawn(move || server::run(vec![server_end]));
    let (binder, binder_events) = BinderClient::new(client_end);

    let source = TcpSource::new(
        &config,
        binder.clone(),
        binder_events,
        Arc::new(StoreStasher {
            store: Arc::clone(&store),
        }),
        Arc::new(SourceMetrics::new()),
    );
    let source_handle = tokio::spawn(source.run(cancel.clone()));

    // act like a syslog sender
    let mut conn = None;
    for _ in 0..100 {
        match tokio::net::TcpStream::connect(("127.0.0.1", listen_port)).await {
            Ok(c) => {
                conn = Some(c);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut conn = conn.expect("listener reachable");
    conn.write_all(b"<14>Oct 11 22:14:15 web1 nginx: request served\n")
        .await
        .unwrap();
    conn.write_all(b"<14>Oct 11 22:14:16 web1 nginx: second one\n")
        .await
        .unwrap();
    conn.flush().await.unwrap();

    // both messages arrive downstream, re-encoded as RFC 5424
    let mut seen = Vec::new();
    for _ in 0..400 {
        seen = received.lock().await.clone();
        if seen.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    // the parser pool may reorder the two frames; both must arrive
    assert!(seen.len() >= 2, "both messages delivered, got {seen:?}");
    for line in &seen {
        assert!(line.starts_with("<14>1 "), "got {line:?}");
        assert!(line.contains("web1"), "got {line:?}");
    }
    assert!(seen.iter().any(|l| l.contains("request served")), "got {seen:?}");
    assert!(seen.iter().any(|l| l.contains("second one")), "got {seen:?}");

    // teardown
    drop(conn);
    cancel.cancel();
    store.dispose_rings();
    let _ = tokio::time::timeout(Duration::from_secs(10), source_handle).await;
    for handle in dispatch_handles {
        let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }
    let _ = binder.byebye();
    binder_thread.join().unwrap().unwrap();
}
