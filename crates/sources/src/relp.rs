//! RELP source service and transaction engine
//!
//! RELP frames arrive as `TXNR SP COMMAND SP DATALEN [SP DATA] LF`. Every
//! `syslog` command is tracked per connection until its downstream verdict
//! arrives - the stash result for the store-backed service, the broker
//! delivery report for direct RELP - and answers are written back strictly
//! in the order the client sent its transactions, which rsyslog requires.
//!
//! Frame parsing is an explicit state machine; any illegal transition
//! counts a protocol error and closes the connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skewer_binder::{into_tcp_stream, into_unix_stream, BinderClient, BinderEvent, Scheme};
use skewer_clients::{DeliveryReport, KafkaProducer, MessageMeta};
use skewer_config::{BaseConfig, FilterEnv, FilterVerdict, RelpSourceConfig};
use skewer_model::{DecoderConfig, FullMessage, ListenerInfo, RawMessage, Uid};
use skewer_queue::{wait_any_async, AckQueue, Ring};

use crate::{conn_labels, ParserPool, RawMessagePool, SourceError, SourceMetrics, StashOutcome, Stasher};

const OPEN_OFFERS: &str = "relp_version=0\nrelp_software=skewer\ncommands=syslog";

// ---------------------------------------------------------------------
// Frame parser
// ---------------------------------------------------------------------

/// One decoded RELP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelpFrame {
    pub txnr: i32,
    pub command: String,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RelpParseError {
    #[error("invalid transaction number")]
    BadTxnr,
    #[error("invalid RELP command")]
    BadCommand,
    #[error("invalid data length")]
    BadDatalen,
    #[error("frame data of {0} bytes exceeds the limit")]
    Oversize(usize),
    #[error("missing frame trailer")]
    BadTrailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingTxnr,
    AwaitingCmd,
    AwaitingLen,
    AwaitingData,
    AwaitingTrailer,
}

/// Incremental frame parser; feed it bytes, collect frames.
pub struct RelpParser {
    state: State,
    max_data: usize,
    txnr: i64,
    txnr_digits: usize,
    command: String,
    datalen: usize,
    len_digits: usize,
    data: Vec<u8>,
}

impl RelpParser {
    pub fn new(max_data: usize) -> Self {
        RelpParser {
            state: State::Idle,
            max_data,
            txnr: 0,
            txnr_digits: 0,
            command: String::new(),
            datalen: 0,
            len_digits: 0,
            data: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.txnr = 0;
        self.txnr_digits = 0;
        self.command.clear();
        self.datalen = 0;
        self.len_digits = 0;
        self.data = Vec::new();
    }

    /// Consume `input`, returning the bytes consumed and at most one
    /// complete frame. Call again with the remainder for further frames.
    pub fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<RelpFrame>), RelpParseError> {
        let mut idx = 0;
        while idx < input.len() {
            let byte = input[idx];
            match self.state {
                State::Idle => match byte {
                    b'\n' | b'\r' => idx += 1,
                    b'0'..=b'9' => self.state = State::AwaitingTxnr,
                    _ => return Err(RelpParseError::BadTxnr),
                },
                State::AwaitingTxnr => match byte {
                    b'0'..=b'9' => {
                        self.txnr = self.txnr * 10 + i64::from(byte - b'0');
                        self.txnr_digits += 1;
                        if self.txnr > i64::from(i32::MAX) {
                            return Err(RelpParseError::BadTxnr);
                        }
                        idx += 1;
                    }
                    b' ' if self.txnr_digits > 0 => {
                        self.state = State::AwaitingCmd;
                        idx += 1;
                    }
                    _ => return Err(RelpParseError::BadTxnr),
                },
                State::AwaitingCmd => match byte {
                    b'a'..=b'z' | b'A'..=b'Z' => {
                        if self.command.len() >= 32 {
                            return Err(RelpParseError::BadCommand);
                        }
                        self.command.push(byte as char);
                        idx += 1;
                    }
                    b' ' if !self.command.is_empty() => {
                        self.state = State::AwaitingLen;
                        idx += 1;
                    }
                    _ => return Err(RelpParseError::BadCommand),
                },
                State::AwaitingLen => match byte {
                    b'0'..=b'9' => {
                        self.datalen = self
                            .datalen
                            .checked_mul(10)
                            .and_then(|d| d.checked_add((byte - b'0') as usize))
                            .ok_or(RelpParseError::BadDatalen)?;
                        self.len_digits += 1;
                        if self.datalen > self.max_data {
                            return Err(RelpParseError::Oversize(self.datalen));
                        }
                        idx += 1;
                    }
                    b'\n' if self.len_digits > 0 && self.datalen == 0 => {
                        idx += 1;
                        let frame = self.complete();
                        return Ok((idx, Some(frame)));
                    }
                    b' ' if self.len_digits > 0 && self.datalen > 0 => {
                        self.data = Vec::with_capacity(self.datalen);
                        self.state = State::AwaitingData;
                        idx += 1;
                    }
                    _ => return Err(RelpParseError::BadDatalen),
                },
                State::AwaitingData => {
                    let want = self.datalen - self.data.len();
                    let take = want.min(input.len() - idx);
                    self.data.extend_from_slice(&input[idx..idx + take]);
                    idx += take;
                    if self.data.len() == self.datalen {
                        self.state = State::AwaitingTrailer;
                    }
                }
                State::AwaitingTrailer => match byte {
                    b'\n' => {
                        idx += 1;
                        let frame = self.complete();
                        return Ok((idx, Some(frame)));
                    }
                    _ => return Err(RelpParseError::BadTrailer),
                },
            }
        }
        Ok((idx, None))
    }

    fn complete(&mut self) -> RelpFrame {
        let frame = RelpFrame {
            txnr: self.txnr as i32,
            command: std::mem::take(&mut self.command),
            data: std::mem::take(&mut self.data),
        };
        self.reset();
        frame
    }
}

// ---------------------------------------------------------------------
// Acknowledgement forwarder
// ---------------------------------------------------------------------

/// Per-connection acknowledgement state.
pub struct ConnAcks {
    pub succ: AckQueue,
    pub fail: AckQueue,
    /// Transaction numbers in arrival order; the front is the only one a
    /// response may be written for.
    order: Mutex<VecDeque<i32>>,
}

impl ConnAcks {
    fn new() -> Self {
        ConnAcks {
            succ: AckQueue::new(),
            fail: AckQueue::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a received `syslog` transaction.
    pub fn received(&self, txnr: i32) {
        self.order.lock().push_back(txnr);
    }

    /// The transaction the next answer must carry.
    pub fn next_to_commit(&self) -> Option<i32> {
        self.order.lock().front().copied()
    }

    /// The front answer has been written.
    pub fn commit(&self) {
        self.order.lock().pop_front();
    }

    fn dispose(&self) {
        self.succ.dispose();
        self.fail.dispose();
    }
}

/// Routes downstream verdicts back to the connection they belong to.
#[derive(Default)]
pub struct AckForwarder {
    conns: Mutex<HashMap<Uid, Arc<ConnAcks>>>,
}

impl AckForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(AckForwarder::default())
    }

    pub fn add_conn(&self) -> (Uid, Arc<ConnAcks>) {
        let id = Uid::new();
        let acks = Arc::new(ConnAcks::new());
        self.conns.lock().insert(id, Arc::clone(&acks));
        (id, acks)
    }

    /// Drop a connection. Unanswered transactions are abandoned; the store
    /// still owns whatever was stashed.
    pub fn remove_conn(&self, id: Uid) {
        if let Some(acks) = self.conns.lock().remove(&id) {
            acks.dispose();
        }
    }

    pub fn remove_all(&self) {
        for (_, acks) in self.conns.lock().drain() {
            acks.dispose();
        }
    }

    pub fn forward_succ(&self, conn: Uid, txnr: i32) {
        if let Some(acks) = self.conns.lock().get(&conn) {
            let _ = acks.succ.put(txnr);
        }
    }

    pub fn forward_fail(&self, conn: Uid, txnr: i32) {
        if let Some(acks) = self.conns.lock().get(&conn) {
            let _ = acks.fail.put(txnr);
        }
    }
}

/// Stasher decorator that reports each transaction's stash verdict to the
/// forwarder (the indirect-RELP downstream).
pub struct RelpStasher {
    inner: Arc<dyn Stasher>,
    forwarder: Arc<AckForwarder>,
}

impl RelpStasher {
    pub fn new(inner: Arc<dyn Stasher>, forwarder: Arc<AckForwarder>) -> Arc<Self> {
        Arc::new(RelpStasher { inner, forwarder })
    }
}

impl Stasher for RelpStasher {
    fn stash(&self, msg: FullMessage) -> StashOutcome {
        let conn = msg.conn_id;
        let txnr = msg.txnr;
        let outcome = self.inner.stash(msg);
        if let Some(txnr) = txnr {
            match outcome {
                StashOutcome::Ok => self.forwarder.forward_succ(conn, txnr),
                _ => self.forwarder.forward_fail(conn, txnr),
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------
// Direct RELP sink
// ---------------------------------------------------------------------

/// The direct-RELP downstream: parsed messages go straight to the broker,
/// and the broker's delivery reports drive the client's ACKs.
///
/// Between parse and broker acknowledgement the message exists only in
/// memory, so this path is at-most-once: a crash in that window loses the
/// message even though the client will get no answer for it.
pub struct DirectRelpSink {
    producer: KafkaProducer,
    filters: HashMap<Uid, FilterEnv>,
    forwarder: Arc<AckForwarder>,
    fatal: CancellationToken,
}

impl DirectRelpSink {
    /// Build the sink and spawn its delivery-report task.
    pub fn new(
        config: &BaseConfig,
        forwarder: Arc<AckForwarder>,
        fatal: CancellationToken,
    ) -> Result<Arc<Self>, SourceError> {
        let (producer, reports) = KafkaProducer::new(&config.kafka_dest)
            .map_err(|e| SourceError::Config(e.to_string()))?;

        let mut filters = HashMap::new();
        for source in &config.directrelp_sources {
            filters.insert(
                source.listener.conf_id,
                FilterEnv::new(&source.listener.filter),
            );
        }

        let sink = Arc::new(DirectRelpSink {
            producer,
            filters,
            forwarder: Arc::clone(&forwarder),
            fatal: fatal.clone(),
        });
        tokio::spawn(handle_broker_reports(
            reports,
            forwarder,
            fatal,
        ));
        Ok(sink)
    }
}

async fn handle_broker_reports(
    mut reports: mpsc::UnboundedReceiver<DeliveryReport>,
    forwarder: Arc<AckForwarder>,
    fatal: CancellationToken,
) {
    while let Some(report) = reports.recv().await {
        let Some(txnr) = report.meta.txnr else { continue };
        match report.error {
            None => forwarder.forward_succ(report.meta.conn_id, txnr),
            Some(error) => {
                forwarder.forward_fail(report.meta.conn_id, txnr);
                tracing::info!(error = %error, txnr, "NACK from the broker");
                if skewer_clients::is_fatal_broker_error(&error) {
                    fatal.cancel();
                    return;
                }
            }
        }
    }
}

impl Stasher for DirectRelpSink {
    fn stash(&self, msg: FullMessage) -> StashOutcome {
        let Some(txnr) = msg.txnr else {
            return StashOutcome::Refused;
        };
        let Some(filter) = self.filters.get(&msg.conf_id) else {
            tracing::warn!(conf_id = %msg.conf_id, txnr, "no configuration for message");
            self.forwarder.forward_fail(msg.conn_id, txnr);
            return StashOutcome::Refused;
        };
        if self.fatal.is_cancelled() {
            return StashOutcome::Fatal;
        }

        let routing = filter.evaluate(&msg.fields);
        match routing.verdict {
            FilterVerdict::Pass => {}
            FilterVerdict::Dropped | FilterVerdict::Rejected => {
                self.forwarder.forward_fail(msg.conn_id, txnr);
                return StashOutcome::Refused;
            }
        }

        let payload = match serde_json::to_vec(&msg.fields) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, txnr, "message serialization failed");
                self.forwarder.forward_fail(msg.conn_id, txnr);
                return StashOutcome::Refused;
            }
        };
        let timestamp = msg.fields.best_time().timestamp_millis();
        self.producer.send(
            routing.topic,
            routing.partition_key,
            routing.partition,
            payload,
            timestamp,
            MessageMeta {
                uid: msg.uid,
                conn_id: msg.conn_id,
                txnr: Some(txnr),
            },
        );
        StashOutcome::Ok
    }
}

// ---------------------------------------------------------------------
// RELP source service
// ---------------------------------------------------------------------

pub struct RelpSource {
    configs: Vec<RelpSourceConfig>,
    proto: &'static str,
    max_message_size: usize,
    queue_size: usize,
    binder: BinderClient,
    events: mpsc::UnboundedReceiver<BinderEvent>,
    stasher: Arc<dyn Stasher>,
    forwarder: Arc<AckForwarder>,
    metrics: Arc<SourceMetrics>,
    fatal: CancellationToken,
}

impl RelpSource {
    /// Store-backed RELP: the stash result drives the ACKs.
    pub fn new(
        config: &BaseConfig,
        binder: BinderClient,
        events: mpsc::UnboundedReceiver<BinderEvent>,
        stasher: Arc<dyn Stasher>,
        forwarder: Arc<AckForwarder>,
        metrics: Arc<SourceMetrics>,
    ) -> RelpSource {
        let stasher = RelpStasher::new(stasher, Arc::clone(&forwarder));
        RelpSource {
            configs: config.relp_sources.clone(),
            proto: "relp",
            max_message_size: config.main.max_input_message_size,
            queue_size: config.main.input_queue_size,
            binder,
            events,
            stasher,
            forwarder,
            metrics,
            fatal: CancellationToken::new(),
        }
    }

    /// Direct RELP: parsed messages go straight to the broker.
    pub fn new_direct(
        config: &BaseConfig,
        binder: BinderClient,
        events: mpsc::UnboundedReceiver<BinderEvent>,
        metrics: Arc<SourceMetrics>,
    ) -> Result<RelpSource, SourceError> {
        let forwarder = AckForwarder::new();
        let fatal = CancellationToken::new();
        let sink = DirectRelpSink::new(config, Arc::clone(&forwarder), fatal.clone())?;
        Ok(RelpSource {
            configs: config.directrelp_sources.clone(),
            proto: "directrelp",
            max_message_size: config.main.max_input_message_size,
            queue_size: config.main.input_queue_size,
            binder,
            events,
            stasher: sink,
            forwarder,
            metrics,
            fatal,
        })
    }

    pub fn fatal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    pub fn listener_infos(&self) -> Vec<ListenerInfo> {
        self.configs
            .iter()
            .map(|c| ListenerInfo {
                proto: self.proto.into(),
                bind_addr: c.listener.bind_addr.clone(),
                port: c.listener.port,
                unix_socket_path: c.listener.unix_socket_path.clone(),
            })
            .collect()
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SourceError> {
        if self.configs.is_empty() {
            tracing::debug!(proto = self.proto, "RELP source not started: no listener");
            return Ok(());
        }

        let raw_ring: Arc<Ring<RawMessage>> = Arc::new(Ring::new(self.queue_size));
        let pool = RawMessagePool::new(self.max_message_size, self.queue_size.min(1024));
        let parsers = ParserPool::spawn(
            self.proto,
            0,
            Arc::clone(&raw_ring),
            Arc::clone(&pool),
            Arc::clone(&self.stasher),
            Arc::clone(&self.metrics),
            self.fatal.clone(),
        );

        let mut by_addr: HashMap<String, RelpSourceConfig> = HashMap::new();
        let mut addrs = Vec::new();
        for config in &self.configs {
            let addr = config.listener.binder_addr(true);
            by_addr.insert(addr.clone(), config.clone());
            addrs.push(addr);
        }
        self.binder.listen(&addrs)?;
        tracing::info!(proto = self.proto, listeners = addrs.len(), "listening on RELP");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.fatal.cancelled() => break,
                event = self.events.recv() => match event {
                    None => break,
                    Some(BinderEvent::NewConn { uid, addr, fd }) => {
                        let Some(config) = by_addr.get(&addr.to_string()).cloned() else {
                            continue;
                        };
                        self.spawn_connection(uid, addr.scheme, fd, config, &raw_ring, &pool, &cancel);
                    }
                    Some(BinderEvent::Error { addr, message }) => {
                        tracing::warn!(addr, message, "binder could not listen");
                    }
                    Some(BinderEvent::Stopped { addr }) => {
                        tracing::debug!(addr, "listener stopped");
                    }
                },
            }
        }

        for addr in &addrs {
            let _ = self.binder.stop_listen(addr);
        }
        let _ = self.binder.close_all();
        raw_ring.dispose();
        tokio::task::spawn_blocking(move || parsers.join())
            .await
            .ok();
        self.forwarder.remove_all();
        tracing::info!(proto = self.proto, "RELP source stopped");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_connection(
        &self,
        binder_uid: String,
        scheme: Scheme,
        fd: std::os::fd::OwnedFd,
        config: RelpSourceConfig,
        raw_ring: &Arc<Ring<RawMessage>>,
        pool: &Arc<RawMessagePool>,
        cancel: &CancellationToken,
    ) {
        let conn = RelpConnection {
            proto: self.proto,
            config,
            max_size: self.max_message_size,
            raw_ring: Arc::clone(raw_ring),
            pool: Arc::clone(pool),
            forwarder: Arc::clone(&self.forwarder),
            metrics: Arc::clone(&self.metrics),
        };
        let cancel = cancel.clone();
        let binder = self.binder.clone();
        tokio::spawn(async move {
            let result = match scheme {
                Scheme::Tcp => match into_tcp_stream(fd) {
                    Ok(stream) => {
                        let labels =
                            conn_labels(stream.peer_addr().ok(), stream.local_addr().ok(), "");
                        let (read_half, write_half) = stream.into_split();
                        conn.handle(read_half, write_half, labels, cancel).await
                    }
                    Err(e) => Err(SourceError::Io(e)),
                },
                _ => match into_unix_stream(fd) {
                    Ok(stream) => {
                        let path = conn.config.listener.unix_socket_path.clone();
                        let labels = conn_labels(None, None, &path);
                        let (read_half, write_half) = stream.into_split();
                        conn.handle(read_half, write_half, labels, cancel).await
                    }
                    Err(e) => Err(SourceError::Io(e)),
                },
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "RELP connection ended with error");
            }
            let _ = binder.close_conn(&binder_uid);
        });
    }
}

struct RelpConnection {
    proto: &'static str,
    config: RelpSourceConfig,
    max_size: usize,
    raw_ring: Arc<Ring<RawMessage>>,
    pool: Arc<RawMessagePool>,
    forwarder: Arc<AckForwarder>,
    metrics: Arc<SourceMetrics>,
}

impl RelpConnection {
    async fn handle<R, W>(
        &self,
        mut read_half: R,
        write_half: W,
        labels: (String, i32, String),
        cancel: CancellationToken,
    ) -> Result<(), SourceError>
    where
        R: AsyncReadExt + Unpin,
        W: AsyncWriteExt + Unpin + Send + 'static,
    {
        let (client, local_port, socket_path) = labels;
        let port_label = if local_port > 0 {
            local_port.to_string()
        } else {
            String::new()
        };
        self.metrics
            .client_conn_total
            .with_label_values(&[self.proto, &client, &port_label, &socket_path])
            .inc();

        let (conn_id, acks) = self.forwarder.add_conn();
        tracing::info!(
            protocol = self.proto,
            conn_id = %conn_id,
            client = %client,
            local_port = local_port,
            format = %self.config.listener.format,
            "new RELP client"
        );

        // inline answers (open/close) share the socket with the ordered
        // ack writer, so everything is written by the same task
        let (inline_tx, inline_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer = tokio::spawn(write_responses(
            write_half,
            Arc::clone(&acks),
            inline_rx,
            Arc::clone(&self.metrics),
            client.clone(),
        ));

        let outcome = self
            .read_frames(&mut read_half, conn_id, &client, local_port, &socket_path, &port_label, &inline_tx, &cancel)
            .await;

        drop(inline_tx);
        self.forwarder.remove_conn(conn_id);
        let _ = writer.await;
        tracing::info!(conn_id = %conn_id, "RELP connection closed");
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_frames<R: AsyncReadExt + Unpin>(
        &self,
        read_half: &mut R,
        conn_id: Uid,
        client: &str,
        local_port: i32,
        socket_path: &str,
        port_label: &str,
        inline_tx: &mpsc::UnboundedSender<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError> {
        let decoder = DecoderConfig {
            format: self.config.listener.format.parse().unwrap_or_default(),
            charset: String::new(),
        };
        let timeout = self.config.listener.timeout;
        let mut parser = RelpParser::new(self.max_size);
        let mut buf = vec![0u8; 16 * 1024];

        loop {
            let read = async {
                if timeout.is_zero() {
                    read_half.read(&mut buf).await
                } else {
                    match tokio::time::timeout(timeout, read_half.read(&mut buf)).await {
                        Ok(result) => result,
                        Err(_) => Ok(0),
                    }
                }
            };
            let n = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                n = read => n?,
            };
            if n == 0 {
                return Ok(());
            }

            let mut rest = &buf[..n];
            while !rest.is_empty() {
                let (consumed, frame) = match parser.feed(rest) {
                    Ok(step) => step,
                    Err(e) => {
                        self.metrics
                            .relp_protocol_errors_total
                            .with_label_values(&[client])
                            .inc();
                        tracing::warn!(client, error = %e, "RELP protocol error, closing");
                        return Ok(());
                    }
                };
                rest = &rest[consumed..];
                let Some(frame) = frame else { continue };

                match frame.command.as_str() {
                    "open" => {
                        let data = format!("200 OK\n{OPEN_OFFERS}");
                        let response =
                            format!("{} rsp {} {}\n", frame.txnr, data.len(), data);
                        let _ = inline_tx.send(response.into_bytes());
                    }
                    "close" => {
                        let _ = inline_tx.send(format!("{} rsp 0\n", frame.txnr).into_bytes());
                        return Ok(());
                    }
                    "syslog" => {
                        self.forwarder_received(&conn_id, frame.txnr);
                        if frame.data.is_empty() {
                            // an empty frame is a valid empty message;
                            // nothing to stash, acknowledge right away
                            self.forwarder.forward_succ(conn_id, frame.txnr);
                            continue;
                        }
                        let mut raw = self.pool.get();
                        raw.client = client.to_string();
                        raw.local_port = local_port;
                        raw.unix_socket_path = socket_path.to_string();
                        raw.conf_id = self.config.listener.conf_id;
                        raw.conn_id = conn_id;
                        raw.txnr = Some(frame.txnr);
                        raw.decoder = decoder.clone();
                        raw.data.extend_from_slice(&frame.data);
                        if self.raw_ring.put_async(raw).await.is_err() {
                            return Ok(());
                        }
                        self.metrics
                            .incoming_msgs_total
                            .with_label_values(&[self.proto, client, port_label, socket_path])
                            .inc();
                    }
                    other => {
                        self.metrics
                            .relp_protocol_errors_total
                            .with_label_values(&[client])
                            .inc();
                        tracing::warn!(client, command = other, "unknown RELP command, closing");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn forwarder_received(&self, conn_id: &Uid, txnr: i32) {
        if let Some(acks) = self.forwarder.conns.lock().get(conn_id) {
            acks.received(txnr);
        }
    }
}

/// Per-connection response writer.
///
/// Drains the success/failure queues into local sets and only ever writes
/// the answer for the front of the arrival order, so the client sees its
/// transaction numbers strictly increasing.
async fn write_responses<W: AsyncWriteExt + Unpin>(
    mut writer: W,
    acks: Arc<ConnAcks>,
    mut inline_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    metrics: Arc<SourceMetrics>,
    client: String,
) {
    let mut successes: HashSet<i32> = HashSet::new();
    let mut failures: HashSet<i32> = HashSet::new();

    loop {
        tokio::select! {
            inline = inline_rx.recv() => match inline {
                Some(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                    let _ = writer.flush().await;
                }
                None => return,
            },
            alive = wait_any_async(&acks.succ, &acks.fail) => {
                if !alive {
                    return;
                }
                while let Some(txnr) = acks.succ.get() {
                    if !failures.contains(&txnr) {
                        successes.insert(txnr);
                    }
                }
                while let Some(txnr) = acks.fail.get() {
                    if !successes.contains(&txnr) {
                        failures.insert(txnr);
                    }
                }

                // answer in arrival order only
                while let Some(next) = acks.next_to_commit() {
                    let line = if successes.remove(&next) {
                        metrics
                            .relp_answers_total
                            .with_label_values(&["200", &client])
                            .inc();
                        format!("{next} rsp 6 200 OK\n")
                    } else if failures.remove(&next) {
                        metrics
                            .relp_answers_total
                            .with_label_values(&["500", &client])
                            .inc();
                        format!("{next} rsp 6 500 KO\n")
                    } else {
                        break;
                    };
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        return;
                    }
                    acks.commit();
                }
                let _ = writer.flush().await;
            }
        }
    }
}

#[cfg(test)]
#[path = "relp_test.rs"]
mod relp_test;
