//! JSON frame decoder
//!
//! One JSON object per frame, with lenient field mapping so that both
//! skewer's own output format and common shippers round-trip.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{DecodeError, Facility, Severity, SyslogMessage};

#[derive(Deserialize)]
struct JsonFrame {
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    facility: Option<i32>,
    #[serde(default)]
    severity: Option<i32>,
    #[serde(default, alias = "timestamp", alias = "time")]
    time_reported: Option<DateTime<Utc>>,
    #[serde(default, alias = "hostname")]
    host: String,
    #[serde(default, alias = "appname", alias = "app")]
    app_name: String,
    #[serde(default, alias = "procid", alias = "pid")]
    proc_id: String,
    #[serde(default, alias = "msgid")]
    msg_id: String,
    #[serde(default, alias = "msg")]
    message: String,
}

pub fn parse(frame: &[u8]) -> Result<SyslogMessage, DecodeError> {
    let parsed: JsonFrame = serde_json::from_slice(frame)?;

    // priority wins when present; otherwise facility/severity are taken as
    // given, defaulting to user.notice like the BSD tools do
    let (facility, severity, priority) = match parsed.priority {
        Some(pri) => {
            if pri > 191 || pri < 0 {
                return Err(DecodeError::BadPriority);
            }
            (
                Facility::from_int(pri >> 3)?,
                Severity::from_int(pri & 0x7)?,
                pri,
            )
        }
        None => {
            let facility = Facility::from_int(parsed.facility.unwrap_or(1))?;
            let severity = Severity::from_int(parsed.severity.unwrap_or(5))?;
            ((facility), severity, ((facility as i32) << 3) | severity as i32)
        }
    };

    Ok(SyslogMessage {
        priority,
        facility,
        severity,
        version: 0,
        time_reported: parsed.time_reported,
        time_generated: Utc::now(),
        host: parsed.host,
        app_name: parsed.app_name,
        proc_id: parsed.proc_id,
        msg_id: parsed.msg_id,
        message: parsed.message,
        ..Default::default()
    })
}
