//! Journald-style source
//!
//! Consumes the journal export format from a local stream (a unix socket
//! or a file): entries are `FIELD=VALUE` lines terminated by an empty
//! line, with large/binary fields spelled as `FIELD`, a little-endian
//! 64-bit size, the raw bytes and a trailing newline. Each entry becomes
//! one message, stashed directly - the feed is already structured, so the
//! parser pool has nothing to add.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use skewer_config::BaseConfig;
use skewer_model::{Facility, FullMessage, Generator, Severity, SyslogMessage, Uid};

use crate::{SourceError, SourceMetrics, StashOutcome, Stasher};

const JOURNAL_NAMESPACE: &str = "journald";

pub struct JournalSource {
    enabled: bool,
    path: PathBuf,
    conf_id: Uid,
    stasher: Arc<dyn Stasher>,
    metrics: Arc<SourceMetrics>,
    fatal: CancellationToken,
}

impl JournalSource {
    pub fn new(
        config: &BaseConfig,
        stasher: Arc<dyn Stasher>,
        metrics: Arc<SourceMetrics>,
    ) -> JournalSource {
        JournalSource {
            enabled: config.journald.enabled,
            path: PathBuf::from(&config.journald.path),
            conf_id: Uid::new(),
            stasher,
            metrics,
            fatal: CancellationToken::new(),
        }
    }

    pub fn fatal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), SourceError> {
        if !self.enabled {
            tracing::debug!("journald source is disabled");
            return Ok(());
        }

        let is_socket = std::fs::metadata(&self.path)
            .map(|m| {
                use std::os::unix::fs::FileTypeExt;
                m.file_type().is_socket()
            })
            .unwrap_or(false);

        if is_socket {
            let stream = tokio::net::UnixStream::connect(&self.path).await?;
            self.consume(BufReader::new(stream), cancel, false).await
        } else {
            let file = tokio::fs::File::open(&self.path).await?;
            self.consume(BufReader::new(file), cancel, true).await
        }
    }

    async fn consume<R: AsyncReadExt + AsyncBufReadExt + Unpin>(
        self,
        mut reader: R,
        cancel: CancellationToken,
        poll_on_eof: bool,
    ) -> Result<(), SourceError> {
        let mut generator = Generator::new();
        tracing::info!(path = %self.path.display(), "journald feed connected");

        loop {
            let entry = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.fatal.cancelled() => return Ok(()),
                entry = read_entry(&mut reader) => entry?,
            };
            let Some(fields) = entry else {
                if poll_on_eof {
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
                tracing::info!("journald feed ended");
                return Ok(());
            };
            if fields.is_empty() {
                continue;
            }

            let msg = entry_to_message(fields);
            let full = FullMessage {
                uid: generator.uid(),
                conn_id: Uid::ZERO,
                conf_id: self.conf_id,
                txnr: None,
                fields: msg,
            };
            self.metrics
                .incoming_msgs_total
                .with_label_values(&["journald", "", "", ""])
                .inc();
            match self.stasher.stash(full) {
                StashOutcome::Fatal => {
                    self.fatal.cancel();
                    return Err(SourceError::StoreFatal);
                }
                _ => continue,
            }
        }
    }
}

/// Read one export-format entry; `None` on EOF at an entry boundary.
async fn read_entry<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<BTreeMap<String, String>>, SourceError> {
    let mut fields = BTreeMap::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(if fields.is_empty() { None } else { Some(fields) });
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.is_empty() {
            // entry terminator
            return Ok(Some(fields));
        }

        match line.iter().position(|&b| b == b'=') {
            Some(eq) => {
                let name = String::from_utf8_lossy(&line[..eq]).into_owned();
                let value = String::from_utf8_lossy(&line[eq + 1..]).into_owned();
                fields.insert(name, value);
            }
            None => {
                // binary field: name, le64 size, raw bytes, newline
                let name = String::from_utf8_lossy(&line).into_owned();
                let mut size_buf = [0u8; 8];
                reader.read_exact(&mut size_buf).await?;
                let size = u64::from_le_bytes(size_buf) as usize;
                if size > 1024 * 1024 {
                    return Err(SourceError::Config(format!(
                        "oversized binary journal field {name} ({size} bytes)"
                    )));
                }
                let mut value = vec![0u8; size];
                reader.read_exact(&mut value).await?;
                let mut lf = [0u8; 1];
                reader.read_exact(&mut lf).await?;
                fields.insert(name, String::from_utf8_lossy(&value).into_owned());
            }
        }
    }
}

fn entry_to_message(mut fields: BTreeMap<String, String>) -> SyslogMessage {
    let severity = fields
        .remove("PRIORITY")
        .and_then(|p| p.parse().ok())
        .and_then(|p| Severity::from_int(p).ok())
        .unwrap_or(Severity::Info);
    let facility = fields
        .remove("SYSLOG_FACILITY")
        .and_then(|f| f.parse().ok())
        .and_then(|f| Facility::from_int(f).ok())
        .unwrap_or(Facility::Daemon);

    let time_reported = fields
        .remove("_SOURCE_REALTIME_TIMESTAMP")
        .or_else(|| fields.remove("__REALTIME_TIMESTAMP"))
        .and_then(|usec| usec.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_micros);

    let mut msg = SyslogMessage {
        priority: ((facility as i32) << 3) | severity as i32,
        facility,
        severity,
        version: 0,
        time_reported,
        time_generated: Utc::now(),
        host: fields.remove("_HOSTNAME").unwrap_or_default(),
        app_name: fields.remove("SYSLOG_IDENTIFIER").unwrap_or_default(),
        proc_id: fields
            .remove("SYSLOG_PID")
            .or_else(|| fields.remove("_PID"))
            .unwrap_or_default(),
        msg_id: fields.remove("MESSAGE_ID").unwrap_or_default(),
        message: fields.remove("MESSAGE").unwrap_or_default(),
        ..Default::default()
    };
    for (name, value) in fields {
        msg.set_property(JOURNAL_NAMESPACE, &name.to_ascii_lowercase(), value);
    }
    msg
}

#[cfg(test)]
#[path = "journal_test.rs"]
mod journal_test;
