//! File destination
//!
//! Messages are appended to files named by a per-message template. Open
//! files are cached; when the cache overflows, the least recently used
//! file is closed. The opened-files gauge tracks the cache size.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use skewer_config::filter::render_path;
use skewer_config::DestinationType;
use skewer_model::encoders::{encode, EncodingFormat};

use crate::{BaseDestination, DestEnv, DestError, Destination, OutputMsg};

struct OpenFile {
    writer: BufWriter<File>,
    last_used: Instant,
}

pub struct FileDestination {
    base: BaseDestination,
    format: EncodingFormat,
    filename_tmpl: String,
    cache_max: usize,
    sync: bool,
    files: HashMap<String, OpenFile>,
}

impl FileDestination {
    pub async fn build(env: &DestEnv) -> Result<FileDestination, DestError> {
        let base = BaseDestination::new(DestinationType::File, env);
        let config = &env.config.file_dest;
        let format = EncodingFormat::parse(&config.format)
            .map_err(|e| DestError::Config(e.to_string()))?;
        base.count_conn(true);
        Ok(FileDestination {
            base,
            format,
            filename_tmpl: config.filename_tmpl.clone(),
            cache_max: config.open_files_cache.max(1),
            sync: config.sync,
            files: HashMap::new(),
        })
    }

    fn open(&mut self, path: &str) -> std::io::Result<&mut OpenFile> {
        if !self.files.contains_key(path) {
            if self.files.len() >= self.cache_max {
                self.evict_oldest();
            }
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.files.insert(
                path.to_string(),
                OpenFile {
                    writer: BufWriter::new(file),
                    last_used: Instant::now(),
                },
            );
            self.base.metrics().opened_files.set(self.files.len() as f64);
        }
        Ok(self.files.get_mut(path).expect("just inserted"))
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .files
            .iter()
            .min_by_key(|(_, f)| f.last_used)
            .map(|(path, _)| path.clone())
        {
            if let Some(mut open) = self.files.remove(&oldest) {
                let _ = open.writer.flush();
            }
            self.base.metrics().opened_files.set(self.files.len() as f64);
        }
    }
}

#[async_trait]
impl Destination for FileDestination {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError> {
        for msg in &msgs {
            let uid = msg.message.uid;
            let mut line = match encode(self.format, &msg.message) {
                Ok(bytes) => bytes,
                Err(_) => {
                    self.base.permerr(uid);
                    continue;
                }
            };
            line.push(b'\n');

            let path = render_path(&self.filename_tmpl, &msg.message.fields);
            if path.is_empty() || path.contains("..") {
                self.base.permerr(uid);
                continue;
            }

            let sync = self.sync;
            let result = self.open(&path).and_then(|open| {
                open.last_used = Instant::now();
                open.writer.write_all(&line)?;
                if sync {
                    open.writer.flush()?;
                    open.writer.get_ref().sync_data()?;
                }
                Ok(())
            });
            match result {
                Ok(()) => self.base.ack(uid),
                Err(e) => {
                    self.files.remove(&path);
                    self.base
                        .metrics()
                        .opened_files
                        .set(self.files.len() as f64);
                    self.base.nack(uid);
                    self.base.dofatal();
                    return Err(e.into());
                }
            }
        }

        for open in self.files.values_mut() {
            let _ = open.writer.flush();
        }
        Ok(())
    }

    async fn close(&mut self) {
        for (_, mut open) in self.files.drain() {
            let _ = open.writer.flush();
        }
        self.base.metrics().opened_files.set(0.0);
    }

    fn fatal(&self) -> CancellationToken {
        self.base.fatal()
    }
}
