//! Store service child
//!
//! Owns the durable store and the destination dispatcher. Messages arrive
//! on the inherited message pipe as length-prefixed sealed blobs relayed
//! by the supervisor; the store child opens, stashes, and lets the
//! dispatcher fan them out. The store itself survives stop/start cycles -
//! only the dispatcher is rebuilt - unless the enabled destination set
//! changed, in which case the store is reopened on the same path.

use std::os::fd::{FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use skewer_config::{BaseConfig, DestinationType};
use skewer_dests::{DestMetrics, Dispatcher};
use skewer_kring::{open_blob, Keyring, Secret, SECRET_LEN};
use skewer_model::{FullMessage, ListenerInfo};
use skewer_store::MessageStore;

use crate::child::{render_registry, ChildService, EventSender};
use crate::handles;
use crate::ipc;

type SharedStore = Arc<Mutex<Option<Arc<MessageStore>>>>;

/// The at-rest key outlives sessions (recovery must decrypt what the
/// previous run wrote), so it lives next to the database, readable only by
/// the store's user.
fn at_rest_cipher(store_path: &Path) -> Result<XChaCha20Poly1305, String> {
    use std::io::{Read, Write};
    use std::os::unix::fs::OpenOptionsExt;

    let key_path = store_path.join(".store-key");
    let secret = if key_path.exists() {
        let mut file =
            std::fs::File::open(&key_path).map_err(|e| format!("opening the store key: {e}"))?;
        let mut material = [0u8; SECRET_LEN];
        file.read_exact(&mut material)
            .map_err(|e| format!("reading the store key: {e}"))?;
        Secret::from_bytes(&mut material)
    } else {
        let secret = Secret::random();
        let mut file = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .mode(0o600)
            .open(&key_path)
            .map_err(|e| format!("creating the store key: {e}"))?;
        file.write_all(secret.expose())
            .map_err(|e| format!("writing the store key: {e}"))?;
        secret
    };
    Ok(XChaCha20Poly1305::new(secret.expose().into()))
}

pub struct StoreService {
    keyring: Arc<Keyring>,
    events: EventSender,
    config: Option<BaseConfig>,
    store_path: PathBuf,
    metrics: Arc<DestMetrics>,
    /// Shared with the pipe-reader task
    store: SharedStore,
    open_dests: Vec<DestinationType>,
    running: Option<Running>,
    pipe_started: bool,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl StoreService {
    pub fn new(keyring: Arc<Keyring>, events: EventSender) -> Result<StoreService> {
        let store_path = std::env::var(handles::ENV_STORE_PATH)
            .map(PathBuf::from)
            .context("missing SKEWER_STORE_PATH")?;
        Ok(StoreService {
            keyring,
            events,
            config: None,
            store_path,
            metrics: Arc::new(DestMetrics::new()),
            store: Arc::new(Mutex::new(None)),
            open_dests: Vec::new(),
            running: None,
            pipe_started: false,
        })
    }

    fn ensure_store(&mut self, config: &BaseConfig) -> Result<Arc<MessageStore>, String> {
        let dests = config.enabled_destinations().to_vec();
        {
            let current = self.store.lock();
            if let Some(store) = current.as_ref() {
                if self.open_dests == dests {
                    return Ok(Arc::clone(store));
                }
            }
        }

        // destination set changed (or first start): (re)open on the pinned
        // path
        if let Some(old) = self.store.lock().take() {
            old.dispose_rings();
            let _ = old.flush();
        }
        let cipher = at_rest_cipher(&self.store_path)?;
        let store = MessageStore::open(
            &self.store_path,
            &dests,
            config.main.dest_queue_size,
            cipher,
        )
        .map_err(|e| format!("could not open the store: {e}"))?;
        self.open_dests = dests;
        *self.store.lock() = Some(Arc::clone(&store));

        // store fatal is a full-process abort
        let shutdown = store.shutdown_chan();
        let events = self.events.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            events.send_bare(ipc::EVT_FATAL).await;
        });

        Ok(store)
    }

    fn ensure_pipe_reader(&mut self) {
        if self.pipe_started {
            return;
        }
        self.pipe_started = true;
        if std::env::var(handles::ENV_HAS_PIPE).as_deref() != Ok("TRUE") {
            tracing::warn!("no message pipe inherited; nothing will reach the store");
            return;
        }
        // SAFETY: fd 16 is the message pipe per the spawn contract
        let pipe = unsafe { std::fs::File::from(OwnedFd::from_raw_fd(handles::MESSAGE_PIPE)) };
        let pipe = tokio::fs::File::from_std(pipe);
        tokio::spawn(read_message_pipe(
            pipe,
            Arc::clone(&self.keyring),
            Arc::clone(&self.store),
            self.events.clone(),
        ));
    }
}

async fn read_message_pipe(
    mut pipe: tokio::fs::File,
    keyring: Arc<Keyring>,
    store: SharedStore,
    events: EventSender,
) {
    let cipher = keyring.box_cipher();
    loop {
        let mut len_buf = [0u8; 4];
        if pipe.read_exact(&mut len_buf).await.is_err() {
            tracing::info!("message pipe closed");
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 || len > 64 * 1024 * 1024 {
            tracing::error!(len, "corrupt length on the message pipe");
            events.send_bare(ipc::EVT_FATAL).await;
            return;
        }
        let mut sealed = vec![0u8; len];
        if pipe.read_exact(&mut sealed).await.is_err() {
            return;
        }

        let Ok(plain) = open_blob(&cipher, &sealed) else {
            tracing::warn!("undecryptable message on the pipe dropped");
            continue;
        };
        let Ok(msg) = FullMessage::from_slice(&plain) else {
            tracing::warn!("undecodable message on the pipe dropped");
            continue;
        };

        let current = store.lock().clone();
        match current {
            Some(store) => {
                if let Err(e) = store.stash(&msg) {
                    tracing::error!(error = %e, "fatal stash failure");
                    events.send_bare(ipc::EVT_FATAL).await;
                    return;
                }
            }
            None => {
                tracing::warn!(uid = %msg.uid, "message arrived before the store was started");
            }
        }
    }
}

#[async_trait]
impl ChildService for StoreService {
    fn set_conf(&mut self, config: BaseConfig) {
        self.config = Some(config);
    }

    async fn start(&mut self) -> Result<Vec<ListenerInfo>, String> {
        if self.running.is_some() {
            return Err("store service already started".into());
        }
        let config = self.config.clone().ok_or("no configuration yet")?;
        let store = self.ensure_store(&config)?;
        self.ensure_pipe_reader();

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::new(config.clone()),
            Arc::clone(&self.metrics),
            cancel.clone(),
        );
        tasks.extend(dispatcher.spawn_all());
        tasks.push(tokio::spawn(Arc::clone(&store).run_sweeper(
            std::time::Duration::from_secs(config.store.sweep_interval_secs),
            cancel.clone(),
        )));

        tracing::info!(
            path = %self.store_path.display(),
            destinations = ?self.open_dests,
            "store service running"
        );
        self.running = Some(Running { cancel, tasks });
        Ok(Vec::new())
    }

    async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            for task in running.tasks {
                let _ = task.await;
            }
        }
        if let Some(store) = self.store.lock().as_ref() {
            let _ = store.flush();
        }
    }

    fn gather(&self) -> String {
        render_registry(&self.metrics.registry)
    }
}
