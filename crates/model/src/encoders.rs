//! Output encoders
//!
//! Destinations pick one wire format for outgoing messages. Encoding errors
//! are permanent for a given message (the bytes will not get better on
//! retry), which is why the dispatcher maps them to `permerr` rather than
//! `nack`.

use std::fmt::Write as _;

use thiserror::Error;

use crate::FullMessage;

/// Wire formats a destination can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingFormat {
    /// RFC 5424 line, nil values for absent fields
    #[default]
    Rfc5424,
    /// RFC 3164 line
    Rfc3164,
    /// The full message as one JSON object
    Json,
    /// `time host app: message` - for files and stderr
    File,
}

impl EncodingFormat {
    pub fn parse(s: &str) -> Result<Self, EncodeError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfc5424" | "5424" | "" => Ok(EncodingFormat::Rfc5424),
            "rfc3164" | "3164" => Ok(EncodingFormat::Rfc3164),
            "json" => Ok(EncodingFormat::Json),
            "file" => Ok(EncodingFormat::File),
            other => Err(EncodeError::UnknownFormat(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncodingFormat::Rfc5424 => "rfc5424",
            EncodingFormat::Rfc3164 => "rfc3164",
            EncodingFormat::Json => "json",
            EncodingFormat::File => "file",
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("unknown encoding format: {0}")]
    UnknownFormat(String),

    #[error("message could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Encode one message in the given format, without a trailing frame
/// delimiter (the client layer owns framing).
pub fn encode(format: EncodingFormat, msg: &FullMessage) -> Result<Vec<u8>, EncodeError> {
    let out = match format {
        EncodingFormat::Rfc5424 => rfc5424_line(msg).into_bytes(),
        EncodingFormat::Rfc3164 => rfc3164_line(msg).into_bytes(),
        EncodingFormat::Json => serde_json::to_vec(&msg.fields)?,
        EncodingFormat::File => file_line(msg).into_bytes(),
    };
    Ok(out)
}

fn nil(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

fn rfc5424_line(msg: &FullMessage) -> String {
    let f = &msg.fields;
    let mut line = String::with_capacity(64 + f.message.len());
    let ts = f
        .time_reported
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string());
    let _ = write!(
        line,
        "<{}>1 {} {} {} {} {} ",
        f.priority,
        ts,
        nil(&f.host),
        nil(&f.app_name),
        nil(&f.proc_id),
        nil(&f.msg_id),
    );
    if f.structured.is_empty() {
        line.push('-');
    } else {
        for (sd_id, params) in &f.structured {
            let _ = write!(line, "[{sd_id}");
            for (name, value) in params {
                let escaped = value
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace(']', "\\]");
                let _ = write!(line, " {name}=\"{escaped}\"");
            }
            line.push(']');
        }
    }
    if !f.message.is_empty() {
        line.push(' ');
        line.push_str(&f.message);
    }
    line
}

fn rfc3164_line(msg: &FullMessage) -> String {
    let f = &msg.fields;
    let ts = f.best_time().format("%b %e %H:%M:%S");
    let tag = if f.proc_id.is_empty() {
        f.app_name.clone()
    } else {
        format!("{}[{}]", f.app_name, f.proc_id)
    };
    if tag.is_empty() {
        format!("<{}>{} {} {}", f.priority, ts, nil(&f.host), f.message)
    } else {
        format!(
            "<{}>{} {} {}: {}",
            f.priority,
            ts,
            nil(&f.host),
            tag,
            f.message
        )
    }
}

fn file_line(msg: &FullMessage) -> String {
    let f = &msg.fields;
    format!(
        "{} {} {} {}",
        f.best_time().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        nil(&f.host),
        nil(&f.app_name),
        f.message
    )
}

#[cfg(test)]
#[path = "encoders_test.rs"]
mod encoders_test;
