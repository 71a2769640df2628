//! Decoder errors

use thiserror::Error;

/// Errors raised while decoding a raw frame into syslog messages.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not valid UTF-8 where the format requires text
    #[error("frame is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// Missing or malformed `<PRI>` header
    #[error("invalid priority header")]
    BadPriority,

    /// Severity outside 0..=7
    #[error("invalid severity value {0}")]
    BadSeverity(i32),

    /// Facility outside 0..=23
    #[error("invalid facility value {0}")]
    BadFacility(i32),

    /// Timestamp did not parse under the format's grammar
    #[error("invalid timestamp: {0}")]
    BadTimestamp(String),

    /// RFC 5424 version field was not `1`
    #[error("unsupported syslog version {0}")]
    BadVersion(String),

    /// Structured data section is malformed
    #[error("malformed structured data")]
    BadStructuredData,

    /// Frame ended before the grammar was satisfied
    #[error("truncated frame")]
    Truncated,

    /// JSON frame did not deserialize
    #[error("invalid JSON frame: {0}")]
    BadJson(#[from] serde_json::Error),

    /// The configured decoder format is not known
    #[error("unknown decoder format: {0}")]
    UnknownFormat(String),
}
