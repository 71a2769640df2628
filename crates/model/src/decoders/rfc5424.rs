//! RFC 5424 (IETF syslog) decoder
//!
//! Grammar: `<PRI>VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP PROCID
//! SP MSGID SP STRUCTURED-DATA [SP MSG]`, with `-` as the nil value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::decoders::{parse_priority, split_priority};
use crate::{DecodeError, SyslogMessage};

pub fn parse(frame: &[u8]) -> Result<SyslogMessage, DecodeError> {
    let (pri, rest) = parse_priority(frame)?;
    let (facility, severity) = split_priority(pri)?;

    let text = std::str::from_utf8(rest)?;
    let mut cursor = Cursor::new(text);

    let version_tok = cursor.token()?;
    let version: i32 = version_tok
        .parse()
        .map_err(|_| DecodeError::BadVersion(version_tok.to_string()))?;
    if version != 1 {
        return Err(DecodeError::BadVersion(version_tok.to_string()));
    }

    let timestamp = cursor.token()?;
    let time_reported = if timestamp == "-" {
        None
    } else {
        Some(parse_timestamp(timestamp)?)
    };

    let host = cursor.nil_token()?;
    let app_name = cursor.nil_token()?;
    let proc_id = cursor.nil_token()?;
    let msg_id = cursor.nil_token()?;

    let structured = parse_structured_data(&mut cursor)?;

    // What remains (if anything) is the free-form message, possibly preceded
    // by a UTF-8 BOM.
    let mut message = cursor.rest();
    if let Some(stripped) = message.strip_prefix(' ') {
        message = stripped;
    }
    let message = message
        .strip_prefix('\u{feff}')
        .unwrap_or(message)
        .to_string();

    Ok(SyslogMessage {
        priority: pri,
        facility,
        severity,
        version,
        time_reported,
        time_generated: Utc::now(),
        host,
        app_name,
        proc_id,
        msg_id,
        structured,
        message,
        properties: BTreeMap::new(),
    })
}

fn parse_timestamp(token: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(token)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DecodeError::BadTimestamp(e.to_string()))
}

/// Parse the STRUCTURED-DATA section at the cursor: either `-` or one or
/// more `[SD-ID PARAM-NAME="PARAM-VALUE" ...]` elements.
fn parse_structured_data(
    cursor: &mut Cursor<'_>,
) -> Result<BTreeMap<String, BTreeMap<String, String>>, DecodeError> {
    let mut out = BTreeMap::new();

    if cursor.peek() == Some('-') {
        cursor.advance(1);
        return Ok(out);
    }
    if cursor.peek() != Some('[') {
        // RFC requires SD or nil; an absent section is a malformed frame.
        return Err(DecodeError::BadStructuredData);
    }

    while cursor.peek() == Some('[') {
        cursor.advance(1);
        let sd_id = cursor.until(&[' ', ']'])?;
        if sd_id.is_empty() {
            return Err(DecodeError::BadStructuredData);
        }
        let params = out.entry(sd_id).or_insert_with(BTreeMap::new);

        loop {
            match cursor.peek() {
                Some(']') => {
                    cursor.advance(1);
                    break;
                }
                Some(' ') => {
                    cursor.advance(1);
                    let name = cursor.until(&['='])?;
                    cursor.advance(1); // '='
                    if cursor.peek() != Some('"') {
                        return Err(DecodeError::BadStructuredData);
                    }
                    cursor.advance(1);
                    let value = cursor.quoted_value()?;
                    params.insert(name, value);
                }
                _ => return Err(DecodeError::BadStructuredData),
            }
        }
    }

    Ok(out)
}

/// A small scanning cursor over the text part of the frame.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.text.len());
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    /// Next space-delimited token; consumes the trailing space.
    fn token(&mut self) -> Result<&'a str, DecodeError> {
        let rest = &self.text[self.pos..];
        if rest.is_empty() {
            return Err(DecodeError::Truncated);
        }
        match rest.find(' ') {
            Some(idx) => {
                let tok = &rest[..idx];
                self.pos += idx + 1;
                Ok(tok)
            }
            None => {
                self.pos = self.text.len();
                Ok(rest)
            }
        }
    }

    /// Like `token`, mapping the nil value `-` to an empty string.
    fn nil_token(&mut self) -> Result<String, DecodeError> {
        let tok = self.token()?;
        Ok(if tok == "-" { String::new() } else { tok.to_string() })
    }

    /// Consume up to (not including) the first of `stops`.
    fn until(&mut self, stops: &[char]) -> Result<String, DecodeError> {
        let rest = &self.text[self.pos..];
        let idx = rest
            .find(|c| stops.contains(&c))
            .ok_or(DecodeError::BadStructuredData)?;
        self.pos += idx;
        Ok(rest[..idx].to_string())
    }

    /// Consume a PARAM-VALUE up to its closing quote, handling the RFC 5424
    /// escapes `\"`, `\\` and `\]`.
    fn quoted_value(&mut self) -> Result<String, DecodeError> {
        let mut out = String::new();
        let mut chars = self.text[self.pos..].char_indices();
        while let Some((idx, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped @ ('"' | '\\' | ']'))) => out.push(escaped),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(DecodeError::BadStructuredData),
                },
                '"' => {
                    self.pos += idx + 1;
                    return Ok(out);
                }
                _ => out.push(c),
            }
        }
        Err(DecodeError::BadStructuredData)
    }
}
