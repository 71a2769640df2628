//! Configuration overlay watching
//!
//! The configuration service can track a prefix-scoped external key-value
//! directory and overlay its entries on top of the file snapshot. The
//! directory client itself is external; this module defines the stream
//! contract plus a file-based implementation used in tests and for simple
//! deployments: every `*.toml` under the overlay directory is merged in
//! lexical order, and a content change emits a new overlay map.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

/// One overlay update: the full key-value view under the watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub entries: BTreeMap<String, String>,
}

/// A source of configuration overlays.
pub trait ConfigWatcher: Send {
    /// Start watching; updates are delivered on the returned channel until
    /// the watcher is dropped. The first event is the current view.
    fn watch(self: Box<Self>) -> mpsc::Receiver<WatchEvent>;
}

/// Polls a directory of TOML fragments.
pub struct FileOverlayWatcher {
    dir: PathBuf,
    period: Duration,
}

impl FileOverlayWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileOverlayWatcher {
            dir: dir.into(),
            period: Duration::from_secs(5),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    fn snapshot(dir: &PathBuf) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        let Ok(listing) = std::fs::read_dir(dir) else {
            return entries;
        };
        let mut paths: Vec<PathBuf> = listing
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();
        for path in paths {
            if let Ok(text) = std::fs::read_to_string(&path) {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                entries.insert(name, text);
            }
        }
        entries
    }
}

impl ConfigWatcher for FileOverlayWatcher {
    fn watch(self: Box<Self>) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut last = None;
            loop {
                let entries = Self::snapshot(&self.dir);
                if last.as_ref() != Some(&entries) {
                    last = Some(entries.clone());
                    if tx.send(WatchEvent { entries }).await.is_err() {
                        return;
                    }
                }
                tokio::time::sleep(self.period).await;
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_watcher_emits_initial_and_changed_views() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10-base.toml"), "x = 1\n").unwrap();

        let watcher =
            Box::new(FileOverlayWatcher::new(dir.path()).with_period(Duration::from_millis(20)));
        let mut rx = watcher.watch();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.entries.get("10-base").map(String::as_str), Some("x = 1\n"));

        std::fs::write(dir.path().join("20-extra.toml"), "y = 2\n").unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.entries.len(), 2);
    }
}
