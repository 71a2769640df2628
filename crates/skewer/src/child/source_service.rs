//! Source service child
//!
//! Hosts one source (TCP, UDP, RELP, journald or accounting) behind the
//! command loop. Stashed messages are shipped to the supervisor as `stash`
//! events; the supervisor relays them onto the store child's message pipe.
//! The binder socket is opened once per process and its event stream is
//! re-attached to whichever service incarnation is currently running, so
//! stop/start cycles never lose the binder.

use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skewer_binder::{BinderClient, BinderEvent};
use skewer_config::BaseConfig;
use skewer_model::{FullMessage, ListenerInfo};
use skewer_sources::{
    AccountingSource, AckForwarder, JournalSource, RelpSource, SourceMetrics, StashOutcome,
    Stasher, TcpSource, UdpSource,
};

use crate::child::{render_registry, ChildService, EventSender};
use crate::handles::Role;
use crate::ipc;

/// Re-attachable binder event stream: the reader thread lives as long as
/// the process; each service incarnation registers its own receiver.
struct BinderEvents {
    current: Arc<Mutex<Option<mpsc::UnboundedSender<BinderEvent>>>>,
}

impl BinderEvents {
    fn new(mut upstream: mpsc::UnboundedReceiver<BinderEvent>) -> Arc<Self> {
        let current: Arc<Mutex<Option<mpsc::UnboundedSender<BinderEvent>>>> =
            Arc::new(Mutex::new(None));
        let distributor = Arc::clone(&current);
        tokio::spawn(async move {
            while let Some(event) = upstream.recv().await {
                let sender = distributor.lock().clone();
                match sender {
                    Some(tx) => {
                        let _ = tx.send(event);
                    }
                    None => {
                        tracing::debug!("binder event with no running service, dropped");
                    }
                }
            }
        });
        Arc::new(BinderEvents { current })
    }

    fn attach(&self) -> mpsc::UnboundedReceiver<BinderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock() = Some(tx);
        rx
    }

    fn detach(&self) {
        *self.current.lock() = None;
    }
}

/// Relays serialized messages to the supervisor as `stash` events.
///
/// Backpressure: the bounded queue refuses after a short wait, which the
/// sources report as a non-fatal stash.
struct PipeStasher {
    tx: mpsc::Sender<Vec<u8>>,
}

impl Stasher for PipeStasher {
    fn stash(&self, msg: FullMessage) -> StashOutcome {
        let Ok(bytes) = msg.to_vec() else {
            return StashOutcome::Refused;
        };
        let mut payload = bytes;
        for _ in 0..2000 {
            match self.tx.try_send(payload) {
                Ok(()) => return StashOutcome::Ok,
                Err(mpsc::error::TrySendError::Full(back)) => {
                    payload = back;
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return StashOutcome::Fatal,
            }
        }
        StashOutcome::Refused
    }
}

pub struct SourceService {
    role: Role,
    config: Option<BaseConfig>,
    events: EventSender,
    metrics: Arc<SourceMetrics>,
    stasher: Arc<PipeStasher>,
    binder: Option<BinderClient>,
    binder_events: Option<Arc<BinderEvents>>,
    running: Option<Running>,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SourceService {
    pub fn new(role: Role, events: EventSender) -> Result<SourceService> {
        // the stash relay runs for the whole process lifetime
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(4096);
        let relay_events = events.clone();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                relay_events.send(ipc::EVT_STASH, payload).await;
            }
        });

        let (binder, binder_events) = match role.binder_fd() {
            Some(fd) => {
                if std::env::var(crate::handles::ENV_HAS_BINDER).as_deref() != Ok("TRUE") {
                    anyhow::bail!("{role} needs a binder socket but none was inherited");
                }
                // SAFETY: the fixed fd is this role's binder socket
                let owned = unsafe { OwnedFd::from_raw_fd(fd) };
                let (client, upstream) = BinderClient::new(owned);
                (Some(client), Some(BinderEvents::new(upstream)))
            }
            None => (None, None),
        };

        Ok(SourceService {
            role,
            config: None,
            events,
            metrics: Arc::new(SourceMetrics::new()),
            stasher: Arc::new(PipeStasher { tx }),
            binder,
            binder_events,
            running: None,
        })
    }

    fn binder(&self) -> Result<(BinderClient, mpsc::UnboundedReceiver<BinderEvent>), String> {
        let client = self.binder.clone().ok_or("no binder socket")?;
        let events = self
            .binder_events
            .as_ref()
            .ok_or("no binder events")?
            .attach();
        Ok((client, events))
    }

    fn watch_fatal(&self, fatal: CancellationToken, cancel: CancellationToken) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = fatal.cancelled() => {
                    events.send_bare(ipc::EVT_FATAL).await;
                }
            }
        });
    }
}

#[async_trait]
impl ChildService for SourceService {
    fn set_conf(&mut self, config: BaseConfig) {
        self.config = Some(config);
    }

    async fn start(&mut self) -> Result<Vec<ListenerInfo>, String> {
        if self.running.is_some() {
            return Err("service already started".into());
        }
        let config = self.config.clone().ok_or("no configuration yet")?;
        let cancel = CancellationToken::new();
        let stasher: Arc<dyn Stasher> = Arc::clone(&self.stasher) as Arc<dyn Stasher>;
        let mut tasks = Vec::new();
        let mut infos = Vec::new();

        match self.role {
            Role::TcpSource => {
                let (binder, events) = self.binder()?;
                let source =
                    TcpSource::new(&config, binder, events, stasher, Arc::clone(&self.metrics));
                infos = source.listener_infos();
                self.watch_fatal(source.fatal(), cancel.clone());
                let run_cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = source.run(run_cancel).await {
                        tracing::error!(error = %e, "TCP source failed");
                    }
                }));
            }
            Role::UdpSource => {
                let (binder, events) = self.binder()?;
                let source =
                    UdpSource::new(&config, binder, events, stasher, Arc::clone(&self.metrics));
                infos = source.listener_infos();
                self.watch_fatal(source.fatal(), cancel.clone());
                let run_cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = source.run(run_cancel).await {
                        tracing::error!(error = %e, "UDP source failed");
                    }
                }));
            }
            Role::RelpSource => {
                let (binder, mut all_events) = self.binder()?;
                // both RELP flavors share this child's binder socket; split
                // the event stream by listener address
                let direct_addrs: std::collections::HashSet<String> = config
                    .directrelp_sources
                    .iter()
                    .map(|s| s.listener.binder_addr(true))
                    .collect();
                let (relp_tx, relp_rx) = mpsc::unbounded_channel();
                let (direct_tx, direct_rx) = mpsc::unbounded_channel();
                tasks.push(tokio::spawn(async move {
                    while let Some(event) = all_events.recv().await {
                        let addr = match &event {
                            BinderEvent::NewConn { addr, .. } => addr.to_string(),
                            BinderEvent::Error { addr, .. } => addr.clone(),
                            BinderEvent::Stopped { addr } => addr.clone(),
                        };
                        let target = if direct_addrs.contains(&addr) {
                            &direct_tx
                        } else {
                            &relp_tx
                        };
                        if target.send(event).is_err() {
                            return;
                        }
                    }
                }));

                let forwarder = AckForwarder::new();
                let source = RelpSource::new(
                    &config,
                    binder.clone(),
                    relp_rx,
                    stasher,
                    forwarder,
                    Arc::clone(&self.metrics),
                );
                infos = source.listener_infos();
                self.watch_fatal(source.fatal(), cancel.clone());
                let run_cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = source.run(run_cancel).await {
                        tracing::error!(error = %e, "RELP source failed");
                    }
                }));

                // direct RELP bypasses the store entirely
                if !config.directrelp_sources.is_empty() {
                    tracing::warn!(
                        "direct RELP enabled: messages are at-most-once between parse and broker ack"
                    );
                    let direct = RelpSource::new_direct(
                        &config,
                        binder,
                        direct_rx,
                        Arc::clone(&self.metrics),
                    )
                    .map_err(|e| e.to_string())?;
                    infos.extend(direct.listener_infos());
                    self.watch_fatal(direct.fatal(), cancel.clone());
                    let run_cancel = cancel.clone();
                    tasks.push(tokio::spawn(async move {
                        if let Err(e) = direct.run(run_cancel).await {
                            tracing::error!(error = %e, "direct RELP source failed");
                        }
                    }));
                }
            }
            Role::JournalSource => {
                let source =
                    JournalSource::new(&config, stasher, Arc::clone(&self.metrics));
                self.watch_fatal(source.fatal(), cancel.clone());
                let run_cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = source.run(run_cancel).await {
                        tracing::error!(error = %e, "journald source failed");
                    }
                }));
            }
            Role::AccountingSource => {
                let source =
                    AccountingSource::new(&config, stasher, Arc::clone(&self.metrics));
                self.watch_fatal(source.fatal(), cancel.clone());
                let run_cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = source.run(run_cancel).await {
                        tracing::error!(error = %e, "accounting source failed");
                    }
                }));
            }
            Role::Configuration | Role::Store | Role::Binder => {
                return Err(format!("{} is not a source role", self.role));
            }
        }

        self.running = Some(Running { cancel, tasks });
        Ok(infos)
    }

    async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            for task in running.tasks {
                let _ = task.await;
            }
        }
        if let Some(binder_events) = &self.binder_events {
            binder_events.detach();
        }
    }

    fn gather(&self) -> String {
        render_registry(&self.metrics.registry)
    }
}
