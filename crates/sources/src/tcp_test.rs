//! TCP source end-to-end tests (real binder, real sockets)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use skewer_binder::{server, BinderClient};
use skewer_config::BaseConfig;
use skewer_model::{FullMessage, Facility, Severity, SKEWER_NAMESPACE};

use crate::{SourceMetrics, StashOutcome, Stasher, TcpSource};

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

fn free_port() -> u16 {
    let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    sock.local_addr().unwrap().port()
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_happy_path() {
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
[main]
max_input_message_size = 1024

[[tcp_source]]
bind_addr = "127.0.0.1"
port = {port}
format = "rfc3164"
"#
    ))
    .unwrap();

    let stasher = Arc::new(CollectingStasher::default());
    let metrics = Arc::new(SourceMetrics::new());
    let source = TcpSource::new(
        &config,
        binder.clone(),
        events,
        stasher.clone() as Arc<dyn Stasher>,
        Arc::clone(&metrics),
    );
    assert_eq!(source.listener_infos().len(), 1);

    let cancel = CancellationToken::new();
    let run = tokio::spawn(source.run(cancel.clone()));

    // wait for the listener, then behave like a syslog sender
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
    let mut conn = conn.expect("listener reachable");
    conn.write_all(b"<14>Oct 11 22:14:15 host app: hello\n")
        .await
        .unwrap();
    conn.flush().await.unwrap();

    // the message flows listener -> ring -> parser -> stasher
    let mut delivered = None;
    for _ in 0..200 {
        if let Some(msg) = stasher.seen.lock().unwrap().first().cloned() {
            delivered = Some(msg);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let msg = delivered.expect("message delivered");

    assert_eq!(msg.fields.message, "hello");
    assert_eq!(msg.fields.facility, Facility::User);
    assert_eq!(msg.fields.severity, Severity::Info);
    assert_eq!(msg.fields.host, "host");
    assert_eq!(msg.fields.app_name, "app");
    assert_eq!(
        msg.fields.get_property(SKEWER_NAMESPACE, "client"),
        Some("127.0.0.1")
    );
    assert_eq!(
        msg.fields.get_property(SKEWER_NAMESPACE, "localport"),
        Some(port.to_string().as_str())
    );

    drop(conn);
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("source stops")
        .unwrap()
        .unwrap();
    let _ = binder.byebye();
    binder_thread.join().unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn oversize_frame_closes_connection_and_stashes_nothing() {
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
[main]
max_input_message_size = 1024

[[tcp_source]]
bind_addr = "127.0.0.1"
port = {port}
format = "auto"
"#
    ))
    .unwrap();

    let stasher = Arc::new(CollectingStasher::default());
    let metrics = Arc::new(SourceMetrics::new());
    let source = TcpSource::new(
        &config,
        binder.clone(),
        events,
        stasher.clone() as Arc<dyn Stasher>,
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
    let mut conn = conn.expect("listener reachable");

    let mut line = vec![b'x'; 2048];
    line.push(b'\n');
    conn.write_all(&line).await.unwrap();
    conn.flush().await.unwrap();

    // the connection must be closed by the source
    let mut buf = [0u8; 1];
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        use tokio::io::AsyncReadExt;
        matches!(conn.read(&mut buf).await, Ok(0))
    })
    .await
    .unwrap_or(false);
    assert!(closed, "oversized frame should close the connection");

    // a parsing-error counter increment, and nothing stashed
    let mut counted = 0;
    for _ in 0..100 {
        counted = metrics
            .parsing_errors_total
            .with_label_values(&["tcp", "127.0.0.1", "auto"])
            .get();
        if counted > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(counted, 1);
    assert!(stasher.seen.lock().unwrap().is_empty());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("source stops")
        .unwrap()
        .unwrap();
    let _ = binder.byebye();
    binder_thread.join().unwrap().unwrap();
}
