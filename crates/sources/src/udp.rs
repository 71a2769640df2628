//! UDP source service
//!
//! Packet listeners hand the bound socket over once; each datagram is one
//! frame, decoded on the same parser pool as the stream sources.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skewer_binder::{into_udp_socket, BinderClient, BinderEvent};
use skewer_config::{BaseConfig, UdpSourceConfig};
use skewer_model::{DecoderConfig, ListenerInfo, RawMessage};
use skewer_queue::Ring;

use crate::{ParserPool, RawMessagePool, SourceError, SourceMetrics, Stasher};

pub struct UdpSource {
    configs: Vec<UdpSourceConfig>,
    max_message_size: usize,
    queue_size: usize,
    binder: BinderClient,
    events: mpsc::UnboundedReceiver<BinderEvent>,
    stasher: Arc<dyn Stasher>,
    metrics: Arc<SourceMetrics>,
    fatal: CancellationToken,
}

impl UdpSource {
    pub fn new(
        config: &BaseConfig,
        binder: BinderClient,
        events: mpsc::UnboundedReceiver<BinderEvent>,
        stasher: Arc<dyn Stasher>,
        metrics: Arc<SourceMetrics>,
    ) -> UdpSource {
        UdpSource {
            configs: config.udp_sources.clone(),
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

    pub fn listener_infos(&self) -> Vec<ListenerInfo> {
        self.configs
            .iter()
            .map(|c| ListenerInfo {
                proto: "udp".into(),
                bind_addr: c.listener.bind_addr.clone(),
                port: c.listener.port,
                unix_socket_path: c.listener.unix_socket_path.clone(),
            })
            .collect()
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SourceError> {
        if self.configs.is_empty() {
            tracing::debug!("UDP source not started: no listener configured");
            return Ok(());
        }

        let raw_ring: Arc<Ring<RawMessage>> = Arc::new(Ring::new(self.queue_size));
        let pool = RawMessagePool::new(self.max_message_size, self.queue_size.min(1024));
        let parsers = ParserPool::spawn(
            "udp",
            0,
            Arc::clone(&raw_ring),
            Arc::clone(&pool),
            Arc::clone(&self.stasher),
            Arc::clone(&self.metrics),
            self.fatal.clone(),
        );

        let mut by_addr: HashMap<String, UdpSourceConfig> = HashMap::new();
        let mut addrs = Vec::new();
        for config in &self.configs {
            let addr = config.listener.binder_addr(false);
            by_addr.insert(addr.clone(), config.clone());
            addrs.push(addr);
        }
        self.binder.listen(&addrs)?;
        tracing::info!(listeners = addrs.len(), "listening on UDP");

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
                        match into_udp_socket(fd) {
                            Ok(socket) => {
                                let task = RecvTask {
                                    socket,
                                    config,
                                    max_size: self.max_message_size,
                                    raw_ring: Arc::clone(&raw_ring),
                                    pool: Arc::clone(&pool),
                                    metrics: Arc::clone(&self.metrics),
                                };
                                let cancel = cancel.clone();
                                let binder = self.binder.clone();
                                tokio::spawn(async move {
                                    task.run(cancel).await;
                                    let _ = binder.close_conn(&uid);
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "packet socket unusable");
                            }
                        }
                    }
                    Some(BinderEvent::Error { addr, message }) => {
                        tracing::warn!(addr, message, "binder could not bind");
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
        tracing::info!("UDP source stopped");
        Ok(())
    }
}

struct RecvTask {
    socket: tokio::net::UdpSocket,
    config: UdpSourceConfig,
    max_size: usize,
    raw_ring: Arc<Ring<RawMessage>>,
    pool: Arc<RawMessagePool>,
    metrics: Arc<SourceMetrics>,
}

impl RecvTask {
    async fn run(self, cancel: CancellationToken) {
        let decoder = DecoderConfig {
            format: self.config.listener.format.parse().unwrap_or_default(),
            charset: String::new(),
        };
        let local_port = self
            .socket
            .local_addr()
            .map(|a| a.port() as i32)
            .unwrap_or(0);
        let port_label = if local_port > 0 {
            local_port.to_string()
        } else {
            String::new()
        };
        let path = self.config.listener.unix_socket_path.clone();
        let mut buf = vec![0u8; self.max_size.max(2048)];

        loop {
            let (len, peer) = tokio::select! {
                _ = cancel.cancelled() => return,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "UDP receive failed");
                        return;
                    }
                },
            };
            if len == 0 || len > self.max_size {
                continue;
            }
            let client = peer.ip().to_string();

            let frame = trim(&buf[..len]);
            if frame.is_empty() {
                continue;
            }

            let mut raw = self.pool.get();
            raw.client = client.clone();
            raw.local_port = local_port;
            raw.unix_socket_path = path.clone();
            raw.conf_id = self.config.listener.conf_id;
            raw.decoder = decoder.clone();
            raw.data.extend_from_slice(frame);

            if self.raw_ring.put_async(raw).await.is_err() {
                return;
            }
            self.metrics
                .incoming_msgs_total
                .with_label_values(&["udp", &client, &port_label, &path])
                .inc();
        }
    }
}

fn trim(frame: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| matches!(b, b' ' | b'\r' | b'\n' | 0);
    let start = frame.iter().position(|b| !is_pad(b)).unwrap_or(frame.len());
    let end = frame.iter().rposition(|b| !is_pad(b)).map_or(start, |i| i + 1);
    &frame[start..end]
}
