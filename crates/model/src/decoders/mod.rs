//! Frame decoders
//!
//! A decoder turns one demarcated frame into zero or more
//! [`SyslogMessage`]s. The formats mirror what real senders emit:
//!
//! - [`rfc3164`] - BSD syslog, still the most common format on the wire
//! - [`rfc5424`] - IETF syslog with structured data
//! - [`json`] - one JSON object per frame
//!
//! `Auto` sniffs between the two syslog flavors by looking at the token
//! after the `<PRI>` header.

pub mod json;
pub mod rfc3164;
pub mod rfc5424;

use crate::{DecodeError, DecoderConfig, Facility, Format, Severity, SyslogMessage};

/// Decode a frame according to the configured format.
pub fn decode(config: &DecoderConfig, frame: &[u8]) -> Result<Vec<SyslogMessage>, DecodeError> {
    match config.format {
        Format::Rfc3164 => rfc3164::parse(frame).map(|m| vec![m]),
        Format::Rfc5424 => rfc5424::parse(frame).map(|m| vec![m]),
        Format::Json => json::parse(frame).map(|m| vec![m]),
        Format::Auto => sniff(frame).map(|m| vec![m]),
    }
}

/// Guess RFC 5424 vs RFC 3164: a version digit followed by a space right
/// after the priority closes means 5424.
fn sniff(frame: &[u8]) -> Result<SyslogMessage, DecodeError> {
    let (_, rest) = parse_priority(frame)?;
    if rest.len() >= 2 && rest[0].is_ascii_digit() && rest[1] == b' ' {
        rfc5424::parse(frame)
    } else {
        rfc3164::parse(frame)
    }
}

/// Parse the `<PRI>` header shared by both syslog formats.
///
/// Returns the priority value and the remainder of the frame.
pub(crate) fn parse_priority(frame: &[u8]) -> Result<(i32, &[u8]), DecodeError> {
    if frame.first() != Some(&b'<') {
        return Err(DecodeError::BadPriority);
    }
    let close = frame
        .iter()
        .position(|&b| b == b'>')
        .ok_or(DecodeError::BadPriority)?;
    // PRI is 1 to 3 digits, 0..=191
    if close < 2 || close > 4 {
        return Err(DecodeError::BadPriority);
    }
    let digits = std::str::from_utf8(&frame[1..close])?;
    let pri: i32 = digits.parse().map_err(|_| DecodeError::BadPriority)?;
    if pri > 191 {
        return Err(DecodeError::BadPriority);
    }
    Ok((pri, &frame[close + 1..]))
}

/// Split a priority value into its facility and severity.
pub(crate) fn split_priority(pri: i32) -> Result<(Facility, Severity), DecodeError> {
    Ok((Facility::from_int(pri >> 3)?, Severity::from_int(pri & 0x7)?))
}

#[cfg(test)]
#[path = "decoders_test.rs"]
mod decoders_test;
