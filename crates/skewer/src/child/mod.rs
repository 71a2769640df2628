//! Worker-child plumbing
//!
//! Every child re-derives the session keyring from the secret pipe, wires
//! its logger, then sits in a command loop: verified frames in on stdin,
//! sealed events out on stdout. The role-specific behavior lives behind
//! [`ChildService`].

mod config_service;
mod source_service;
mod store_service;

use std::io::Read;
use std::os::fd::{FromRawFd, OwnedFd};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use skewer_config::BaseConfig;
use skewer_kring::{Frame, FrameCodec, FrameReader, FrameWriter, Keyring, Secret, SECRET_LEN};
use skewer_model::{ListenerInfo, Uid};

use crate::handles::{self, Role};
use crate::ipc;
use crate::logging;

/// Sealed event channel back to the supervisor.
#[derive(Clone)]
pub struct EventSender {
    writer: Arc<tokio::sync::Mutex<FrameWriter<tokio::io::Stdout>>>,
}

impl EventSender {
    pub async fn send(&self, command: &str, payload: Vec<u8>) {
        let frame = Frame::new(command, payload);
        if let Err(e) = self.writer.lock().await.write(&frame).await {
            tracing::error!(error = %e, command, "event channel to the supervisor broke");
        }
    }

    pub async fn send_bare(&self, command: &str) {
        self.send(command, Vec::new()).await;
    }
}

/// One role's behavior inside the child command loop.
#[async_trait]
pub trait ChildService: Send {
    fn set_conf(&mut self, config: BaseConfig);
    async fn start(&mut self) -> Result<Vec<ListenerInfo>, String>;
    async fn stop(&mut self);
    /// Prometheus text exposition of this service's registry.
    fn gather(&self) -> String;
    /// Configuration service only.
    async fn reload(&mut self) {}
}

/// Entry point for every `SKEWER_ROLE` re-execution.
pub fn child_main(role: Role) -> Result<()> {
    let session = std::env::var(handles::ENV_SESSION)
        .ok()
        .and_then(|s| Uid::from_str(s.trim()).ok())
        .context("missing or invalid session id")?;

    // the master secret arrives on the inherited pipe
    // SAFETY: fd 15 is the secret pipe per the spawn contract
    let mut secret_pipe = unsafe { std::fs::File::from(OwnedFd::from_raw_fd(handles::SECRET_PIPE)) };
    let mut material = [0u8; SECRET_LEN];
    secret_pipe
        .read_exact(&mut material)
        .context("reading the master secret")?;
    drop(secret_pipe);
    let keyring = Arc::new(Keyring::from_parts(session, Secret::from_bytes(&mut material)));

    if std::env::var(handles::ENV_HAS_LOGGER).as_deref() == Ok("TRUE") {
        logging::init_child(role.logger_fd(), "info", keyring.box_cipher())?;
    }
    tracing::info!(role = %role, session = %session, "worker started");

    if role == Role::Binder {
        return run_binder();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the child runtime")?;
    runtime.block_on(child_loop(role, keyring))
}

fn run_binder() -> Result<()> {
    let count: usize = std::env::var(handles::ENV_BINDER_COUNT)
        .ok()
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let clients = (0..count)
        .map(|i| {
            // SAFETY: fds CHILD_BINDER.. are the binder's client sockets
            unsafe { OwnedFd::from_raw_fd(handles::CHILD_BINDER + i as std::os::fd::RawFd) }
        })
        .collect();
    skewer_binder::server::run(clients).context("binder server failed")
}

async fn child_loop(role: Role, keyring: Arc<Keyring>) -> Result<()> {
    let mut reader = FrameReader::new(
        tokio::io::stdin(),
        FrameCodec::Verify(keyring.verifying_key()),
    );
    let events = EventSender {
        writer: Arc::new(tokio::sync::Mutex::new(FrameWriter::new(
            tokio::io::stdout(),
            FrameCodec::Seal(keyring.box_cipher()),
        ))),
    };

    let mut service: Box<dyn ChildService> = match role {
        Role::Configuration => Box::new(config_service::ConfigService::new(events.clone())),
        Role::Store => Box::new(store_service::StoreService::new(
            Arc::clone(&keyring),
            events.clone(),
        )?),
        Role::TcpSource | Role::UdpSource | Role::RelpSource | Role::JournalSource
        | Role::AccountingSource => {
            Box::new(source_service::SourceService::new(role, events.clone())?)
        }
        Role::Binder => unreachable!("binder runs outside the command loop"),
    };

    loop {
        let frame = match reader.next().await {
            Ok(Some(frame)) => frame,
            // parent gone or channel compromised: shut down
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "command channel failed");
                break;
            }
        };

        match frame.command.as_str() {
            ipc::CMD_SETCONF => match BaseConfig::import(&frame.payload) {
                Ok(config) => service.set_conf(config),
                Err(e) => tracing::error!(error = %e, "undecodable configuration snapshot"),
            },
            ipc::CMD_START => match service.start().await {
                Ok(infos) => {
                    events.send_bare(ipc::EVT_STARTED).await;
                    if let Ok(json) = serde_json::to_vec(&infos) {
                        events.send(ipc::EVT_LISTENERS, json).await;
                    }
                }
                Err(message) => {
                    events.send(ipc::EVT_STARTERROR, message.into_bytes()).await;
                }
            },
            ipc::CMD_STOP => {
                service.stop().await;
                events.send_bare(ipc::EVT_STOPPED).await;
            }
            ipc::CMD_SHUTDOWN => {
                service.stop().await;
                events.send_bare(ipc::EVT_STOPPED).await;
                break;
            }
            ipc::CMD_GATHER => {
                events
                    .send(ipc::EVT_METRICS, service.gather().into_bytes())
                    .await;
            }
            ipc::CMD_RELOAD => service.reload().await,
            other => {
                tracing::warn!(command = other, "unknown command ignored");
            }
        }
    }

    service.stop().await;
    tracing::info!(role = %role, "worker exiting");
    Ok(())
}

/// Render a prometheus registry to text exposition format.
pub(crate) fn render_registry(registry: &prometheus::Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut out = Vec::new();
    if encoder.encode(&registry.gather(), &mut out).is_err() {
        return String::new();
    }
    String::from_utf8(out).unwrap_or_default()
}
