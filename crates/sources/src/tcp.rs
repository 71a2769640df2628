//! TCP source service
//!
//! Listens through the binder, runs one task per accepted connection, and
//! feeds demarcated frames into the raw ring. The parser pool drains the
//! ring and stashes the decoded messages.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skewer_binder::{into_tcp_stream, into_unix_stream, BinderClient, BinderEvent, Scheme};
use skewer_config::{BaseConfig, TcpSourceConfig};
use skewer_model::{DecoderConfig, ListenerInfo, RawMessage, Uid};
use skewer_queue::Ring;

use crate::framer::{read_frame, FrameMode, FramerError};
use crate::{conn_labels, ParserPool, RawMessagePool, SourceError, SourceMetrics, Stasher};

pub struct TcpSource {
    configs: Vec<TcpSourceConfig>,
    max_message_size: usize,
    queue_size: usize,
    binder: BinderClient,
    events: mpsc::UnboundedReceiver<BinderEvent>,
    stasher: Arc<dyn Stasher>,
    metrics: Arc<SourceMetrics>,
    /// Raised on unrecoverable trouble (store fatal); the supervisor
    /// restarts the service.
    fatal: CancellationToken,
}

impl TcpSource {
    pub fn new(
        config: &BaseConfig,
        binder: BinderClient,
        events: mpsc::UnboundedReceiver<BinderEvent>,
        stasher: Arc<dyn Stasher>,
        metrics: Arc<SourceMetrics>,
    ) -> TcpSource {
        TcpSource {
            configs: config.tcp_sources.clone(),
            max_message_size: config.main.max_input_message_size,
            queue_size: config.main.input_queue_size,
            binder,
            events,
            stasher,
            metrics,
            fatal: CancellationToken::new(),
        }
    }

    pub fn fatal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// What this service listens on, for the supervisor's report.
    pub fn listener_infos(&self) -> Vec<ListenerInfo> {
        self.configs
            .iter()
            .map(|c| ListenerInfo {
                proto: "tcp".into(),
                bind_addr: c.listener.bind_addr.clone(),
                port: c.listener.port,
                unix_socket_path: c.listener.unix_socket_path.clone(),
            })
            .collect()
    }

    /// Run until cancelled. Shutdown order: stop listening, dispose the
    /// raw ring, then wait for the parsers to drain.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SourceError> {
        if self.configs.is_empty() {
            tracing::debug!("TCP source not started: no listener configured");
            return Ok(());
        }

        let raw_ring: Arc<Ring<RawMessage>> = Arc::new(Ring::new(self.queue_size));
        let pool = RawMessagePool::new(self.max_message_size, self.queue_size.min(1024));
        let parsers = ParserPool::spawn(
            "tcp",
            0,
            Arc::clone(&raw_ring),
            Arc::clone(&pool),
            Arc::clone(&self.stasher),
            Arc::clone(&self.metrics),
            self.fatal.clone(),
        );

        let mut by_addr: HashMap<String, TcpSourceConfig> = HashMap::new();
        let mut addrs = Vec::new();
        for config in &self.configs {
            let addr = config.listener.binder_addr(true);
            by_addr.insert(addr.clone(), config.clone());
            addrs.push(addr);
        }
        self.binder.listen(&addrs)?;
        tracing::info!(listeners = addrs.len(), "listening on TCP");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.fatal.cancelled() => break,
                event = self.events.recv() => match event {
                    None => break,
                    Some(BinderEvent::NewConn { uid, addr, fd }) => {
                        let Some(config) = by_addr.get(&addr.to_string()).cloned() else {
                            tracing::warn!(addr = %addr, "connection for unknown listener");
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
        tracing::info!("TCP source stopped");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_connection(
        &self,
        uid: String,
        scheme: Scheme,
        fd: std::os::fd::OwnedFd,
        config: TcpSourceConfig,
        raw_ring: &Arc<Ring<RawMessage>>,
        pool: &Arc<RawMessagePool>,
        cancel: &CancellationToken,
    ) {
        let raw_ring = Arc::clone(raw_ring);
        let pool = Arc::clone(pool);
        let metrics = Arc::clone(&self.metrics);
        let cancel = cancel.clone();
        let binder = self.binder.clone();
        let max_size = self.max_message_size;

        tokio::spawn(async move {
            let result = match scheme {
                Scheme::Tcp => match into_tcp_stream(fd) {
                    Ok(stream) => {
                        let labels =
                            conn_labels(stream.peer_addr().ok(), stream.local_addr().ok(), "");
                        handle_connection(
                            stream, labels, config, max_size, raw_ring, pool, metrics, cancel,
                        )
                        .await
                    }
                    Err(e) => Err(SourceError::Io(e)),
                },
                _ => match into_unix_stream(fd) {
                    Ok(stream) => {
                        let labels =
                            conn_labels(None, None, &config.listener.unix_socket_path);
                        handle_connection(
                            stream, labels, config, max_size, raw_ring, pool, metrics, cancel,
                        )
                        .await
                    }
                    Err(e) => Err(SourceError::Io(e)),
                },
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "TCP connection ended with error");
            }
            let _ = binder.close_conn(&uid);
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection<S: AsyncRead + Unpin>(
    stream: S,
    labels: (String, i32, String),
    config: TcpSourceConfig,
    max_size: usize,
    raw_ring: Arc<Ring<RawMessage>>,
    pool: Arc<RawMessagePool>,
    metrics: Arc<SourceMetrics>,
    cancel: CancellationToken,
) -> Result<(), SourceError> {
    let (client, local_port, socket_path) = labels;
    let port_label = if local_port > 0 {
        local_port.to_string()
    } else {
        String::new()
    };
    metrics
        .client_conn_total
        .with_label_values(&["tcp", &client, &port_label, &socket_path])
        .inc();
    tracing::info!(
        protocol = "tcp",
        client = %client,
        local_port = local_port,
        unix_socket_path = %socket_path,
        format = %config.listener.format,
        "new client"
    );

    let decoder = DecoderConfig {
        format: config.listener.format.parse().unwrap_or_default(),
        charset: String::new(),
    };
    let mode = if config.listener.line_framing {
        FrameMode::Line(
            config
                .listener
                .frame_delimiter
                .as_bytes()
                .first()
                .copied()
                .unwrap_or(b'\n'),
        )
    } else {
        FrameMode::Syslog
    };
    let timeout = config.listener.timeout;

    let mut reader = BufReader::with_capacity(max_size.min(256 * 1024), stream);
    let mut buf = Vec::with_capacity(max_size.min(8192));

    loop {
        let read = async {
            if timeout.is_zero() {
                read_frame(&mut reader, mode, max_size, &mut buf).await
            } else {
                match tokio::time::timeout(
                    timeout,
                    read_frame(&mut reader, mode, max_size, &mut buf),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(client = %client, "connection idle timeout");
                        Ok(false)
                    }
                }
            }
        };

        let got_frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = read => match result {
                Ok(got) => got,
                Err(FramerError::Oversize { size, limit }) => {
                    metrics
                        .parsing_errors_total
                        .with_label_values(&["tcp", &client, decoder.format.as_str()])
                        .inc();
                    tracing::warn!(client = %client, size, limit, "oversized frame, closing connection");
                    return Ok(());
                }
                Err(FramerError::Io(e)) => return Err(e.into()),
            },
        };
        if !got_frame {
            tracing::info!(client = %client, "end of client connection");
            return Ok(());
        }
        if buf.is_empty() {
            continue;
        }

        let mut raw = pool.get();
        raw.client = client.clone();
        raw.local_port = local_port;
        raw.unix_socket_path = socket_path.clone();
        raw.conf_id = config.listener.conf_id;
        raw.conn_id = Uid::ZERO;
        raw.decoder = decoder.clone();
        raw.data.extend_from_slice(&buf);

        if raw_ring.put_async(raw).await.is_err() {
            // disposed: the service is shutting down
            return Ok(());
        }
        metrics
            .incoming_msgs_total
            .with_label_values(&["tcp", &client, &port_label, &socket_path])
            .inc();
    }
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
