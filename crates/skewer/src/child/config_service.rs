//! Configuration service child
//!
//! Loads the TOML snapshot, publishes it as `newconf`, watches the overlay
//! directory, and answers `reload` by loading a fresh snapshot. The store
//! directory is pinned to the first snapshot's value: a reload never moves
//! the store mid-run.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use skewer_config::{BaseConfig, ConfigWatcher, FileOverlayWatcher};
use skewer_model::ListenerInfo;

use crate::child::{ChildService, EventSender};
use crate::handles;
use crate::ipc;

pub struct ConfigService {
    dir: PathBuf,
    events: EventSender,
    pinned_store_dir: Option<String>,
    watcher_running: bool,
}

impl ConfigService {
    pub fn new(events: EventSender) -> ConfigService {
        let dir = std::env::var(handles::ENV_CONF_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/skewer"));
        ConfigService {
            dir,
            events,
            pinned_store_dir: None,
            watcher_running: false,
        }
    }

    fn load(&mut self) -> Result<BaseConfig, String> {
        let mut config = BaseConfig::load(&self.dir).map_err(|e| e.to_string())?;
        match &self.pinned_store_dir {
            Some(dir) => config.store.dirname = dir.clone(),
            None => self.pinned_store_dir = Some(config.store.dirname.clone()),
        }
        Ok(config)
    }

    async fn publish(&mut self) -> Result<(), String> {
        let config = self.load()?;
        let payload = config.export().map_err(|e| e.to_string())?;
        self.events.send(ipc::EVT_NEWCONF, payload).await;
        Ok(())
    }

    fn spawn_overlay_watcher(&mut self) {
        if self.watcher_running {
            return;
        }
        self.watcher_running = true;

        let overlay_dir = self.dir.join("overlays");
        if !overlay_dir.is_dir() {
            return;
        }
        let watcher = Box::new(
            FileOverlayWatcher::new(overlay_dir).with_period(Duration::from_secs(5)),
        );
        let mut updates = watcher.watch();
        let events = self.events.clone();
        let dir = self.dir.clone();
        let pinned = self.pinned_store_dir.clone();
        tokio::spawn(async move {
            // the initial view is what the load already saw
            let _ = updates.recv().await;
            while updates.recv().await.is_some() {
                tracing::info!("overlay change detected, publishing a new snapshot");
                match BaseConfig::load(&dir) {
                    Ok(mut config) => {
                        if let Some(dir) = &pinned {
                            config.store.dirname = dir.clone();
                        }
                        if let Ok(payload) = config.export() {
                            events.send(ipc::EVT_NEWCONF, payload).await;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "overlay reload failed, keeping old snapshot")
                    }
                }
            }
        });
    }
}

#[async_trait]
impl ChildService for ConfigService {
    fn set_conf(&mut self, _config: BaseConfig) {
        // the configuration service is the producer, not a consumer
    }

    async fn start(&mut self) -> Result<Vec<ListenerInfo>, String> {
        self.publish().await?;
        self.spawn_overlay_watcher();
        Ok(Vec::new())
    }

    async fn stop(&mut self) {}

    fn gather(&self) -> String {
        String::new()
    }

    async fn reload(&mut self) {
        match self.publish().await {
            Ok(()) => self.events.send_bare(ipc::EVT_RELOADED).await,
            Err(message) => {
                self.events
                    .send(ipc::EVT_STARTERROR, message.into_bytes())
                    .await
            }
        }
    }
}
