//! RFC 3164 (BSD syslog) decoder
//!
//! The shape is `<PRI>Mmm dd hh:mm:ss HOST TAG[PID]: MSG`, but real senders
//! are sloppy, so the decoder is deliberately lenient: a missing or broken
//! timestamp demotes the rest of the frame to the message body instead of
//! failing the frame.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

use crate::decoders::{parse_priority, split_priority};
use crate::{DecodeError, SyslogMessage};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub fn parse(frame: &[u8]) -> Result<SyslogMessage, DecodeError> {
    let (pri, rest) = parse_priority(frame)?;
    let (facility, severity) = split_priority(pri)?;
    let text = std::str::from_utf8(rest)?.trim_start();

    let mut msg = SyslogMessage {
        priority: pri,
        facility,
        severity,
        version: 0,
        time_generated: Utc::now(),
        ..Default::default()
    };

    let (time_reported, after_ts) = match parse_bsd_timestamp(text) {
        Some((ts, rest)) => (Some(ts), rest),
        None => (None, text),
    };
    msg.time_reported = time_reported;

    let mut remainder = after_ts.trim_start();
    if time_reported.is_some() {
        // HOST is only present when the timestamp parsed; without it the
        // frame is just a tagless message.
        if let Some(idx) = remainder.find(' ') {
            msg.host = remainder[..idx].to_string();
            remainder = remainder[idx + 1..].trim_start();
        } else {
            msg.host = remainder.to_string();
            remainder = "";
        }
    }

    // TAG[PID]: rest
    if let Some(colon) = remainder.find(':') {
        let tag = &remainder[..colon];
        if !tag.contains(' ') && !tag.is_empty() {
            if let Some(open) = tag.find('[') {
                msg.app_name = tag[..open].to_string();
                msg.proc_id = tag[open + 1..].trim_end_matches(']').to_string();
            } else {
                msg.app_name = tag.to_string();
            }
            remainder = remainder[colon + 1..].trim_start();
        }
    }

    msg.message = remainder.to_string();
    Ok(msg)
}

/// Parse `Mmm dd hh:mm:ss`. The year is absent on the wire; the current
/// year is assumed, shifted back by one when that would land the timestamp
/// more than a day in the future (messages sent around new year).
fn parse_bsd_timestamp(text: &str) -> Option<(DateTime<Utc>, &str)> {
    // "Oct 11 22:14:15" is 15 bytes; "Oct  1 22:14:15" pads the day.
    if text.len() < 15 {
        return None;
    }
    let month = MONTHS.iter().position(|m| text.starts_with(m))? as u32 + 1;

    let day_str = text.get(4..6)?.trim();
    let day: u32 = day_str.parse().ok()?;

    let hms = text.get(7..15)?;
    let mut parts = hms.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: u32 = parts.next()?.parse().ok()?;

    let now = Utc::now();
    let mut year = now.year();
    let date = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    let mut ts = Utc.from_utc_datetime(&date);
    if ts > now + chrono::Duration::days(1) {
        year -= 1;
        let date =
            NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
        ts = Utc.from_utc_datetime(&date);
    }

    Some((ts, &text[15..]))
}
