//! Process accounting source
//!
//! Tails the kernel's process accounting file and emits one message per
//! completed process. Records are the fixed 64-byte v3 layout of acct(5);
//! times are stored as comp_t, a 3-bit base-8 exponent over a 13-bit
//! mantissa.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use skewer_config::BaseConfig;
use skewer_model::{Facility, FullMessage, Generator, Severity, SyslogMessage, Uid};

use crate::{SourceError, SourceMetrics, StashOutcome, Stasher};

const ACCT_NAMESPACE: &str = "acct";
const RECORD_LEN: usize = 64;
const ACCT_VERSION_V3: u8 = 3;

/// One decoded accounting record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AcctRecord {
    pub flag: u8,
    pub exitcode: u32,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub ppid: u32,
    pub btime: u32,
    pub etime: f32,
    pub utime: u64,
    pub stime: u64,
    pub mem: u64,
    pub comm: String,
}

/// Decode comp_t: 13-bit mantissa scaled by 8^exponent.
pub(crate) fn decode_comp(value: u16) -> u64 {
    let exponent = (value >> 13) & 0x7;
    let mantissa = u64::from(value & 0x1fff);
    mantissa << (3 * exponent)
}

/// Parse one v3 record; `None` when the version byte is not v3.
pub(crate) fn parse_record(buf: &[u8; RECORD_LEN]) -> Option<AcctRecord> {
    let u16le = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
    let u32le = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);

    if buf[1] != ACCT_VERSION_V3 {
        return None;
    }
    let comm_raw = &buf[48..64];
    let comm_end = comm_raw.iter().position(|&b| b == 0).unwrap_or(16);
    let comm = String::from_utf8_lossy(&comm_raw[..comm_end]).into_owned();

    Some(AcctRecord {
        flag: buf[0],
        exitcode: u32le(4),
        uid: u32le(8),
        gid: u32le(12),
        pid: u32le(16),
        ppid: u32le(20),
        btime: u32le(24),
        etime: f32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]),
        utime: decode_comp(u16le(32)),
        stime: decode_comp(u16le(34)),
        mem: decode_comp(u16le(38)),
        comm,
    })
}

pub(crate) fn record_to_message(record: &AcctRecord) -> SyslogMessage {
    let mut msg = SyslogMessage {
        priority: ((Facility::Daemon as i32) << 3) | Severity::Info as i32,
        facility: Facility::Daemon,
        severity: Severity::Info,
        version: 0,
        time_reported: DateTime::<Utc>::from_timestamp(i64::from(record.btime), 0),
        time_generated: Utc::now(),
        app_name: "accounting".into(),
        proc_id: record.pid.to_string(),
        message: format!("process {} exited", record.comm),
        ..Default::default()
    };
    msg.set_property(ACCT_NAMESPACE, "comm", record.comm.clone());
    msg.set_property(ACCT_NAMESPACE, "uid", record.uid.to_string());
    msg.set_property(ACCT_NAMESPACE, "gid", record.gid.to_string());
    msg.set_property(ACCT_NAMESPACE, "pid", record.pid.to_string());
    msg.set_property(ACCT_NAMESPACE, "ppid", record.ppid.to_string());
    msg.set_property(ACCT_NAMESPACE, "exitcode", record.exitcode.to_string());
    msg.set_property(ACCT_NAMESPACE, "etime", format!("{}", record.etime));
    msg.set_property(ACCT_NAMESPACE, "utime", record.utime.to_string());
    msg.set_property(ACCT_NAMESPACE, "stime", record.stime.to_string());
    msg.set_property(ACCT_NAMESPACE, "mem", record.mem.to_string());
    msg
}

pub struct AccountingSource {
    enabled: bool,
    path: PathBuf,
    period: Duration,
    conf_id: Uid,
    stasher: Arc<dyn Stasher>,
    metrics: Arc<SourceMetrics>,
    fatal: CancellationToken,
}

impl AccountingSource {
    pub fn new(
        config: &BaseConfig,
        stasher: Arc<dyn Stasher>,
        metrics: Arc<SourceMetrics>,
    ) -> AccountingSource {
        AccountingSource {
            enabled: config.accounting.enabled,
            path: PathBuf::from(&config.accounting.path),
            period: config.accounting.period,
            conf_id: Uid::new(),
            stasher,
            metrics,
            fatal: CancellationToken::new(),
        }
    }

    pub fn fatal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Tail the accounting file, starting at its current end. A shrinking
    /// file (kernel rotated it) restarts from the beginning.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SourceError> {
        if !self.enabled {
            tracing::debug!("accounting source is disabled");
            return Ok(());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        let mut offset = file.metadata().await?.len();
        // start on a record boundary
        offset -= offset % RECORD_LEN as u64;
        tracing::info!(path = %self.path.display(), offset, "accounting source started");

        let mut generator = Generator::new();
        let mut record_buf = [0u8; RECORD_LEN];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.fatal.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.period) => {}
            }

            let len = file.metadata().await?.len();
            if len < offset {
                tracing::info!("accounting file shrank, rescanning from start");
                offset = 0;
            }

            file.seek(std::io::SeekFrom::Start(offset)).await?;
            while offset + RECORD_LEN as u64 <= len {
                file.read_exact(&mut record_buf).await?;
                offset += RECORD_LEN as u64;

                let Some(record) = parse_record(&record_buf) else {
                    continue;
                };
                let full = FullMessage {
                    uid: generator.uid(),
                    conn_id: Uid::ZERO,
                    conf_id: self.conf_id,
                    txnr: None,
                    fields: record_to_message(&record),
                };
                self.metrics
                    .incoming_msgs_total
                    .with_label_values(&["accounting", "", "", ""])
                    .inc();
                if self.stasher.stash(full) == StashOutcome::Fatal {
                    self.fatal.cancel();
                    return Err(SourceError::StoreFatal);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "accounting_test.rs"]
mod accounting_test;
