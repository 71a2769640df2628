//! Streaming framer
//!
//! Demarcates syslog frames on a stream connection:
//!
//! - **Syslog mode**: a frame starting with a decimal token followed by a
//!   space is octet-counted (`LEN SP BODY`); anything else, `<PRI`-headed
//!   frames included, is newline-delimited. A token that fails to parse as
//!   a length (a zero-length token included) falls back to the newline
//!   path.
//! - **Line mode**: frames split on a configurable delimiter byte.
//!
//! Frames are bounded by `max_size`; an oversized frame is an error the
//! caller answers by dropping the message and closing the connection.
//! Leading and trailing space/CR/LF are trimmed. A partial frame at EOF is
//! dropped, like a scanner would.

use thiserror::Error;
use tokio::io::AsyncBufReadExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Octet-counting with newline fallback
    Syslog,
    /// Split on one delimiter byte
    Line(u8),
}

#[derive(Debug, Error)]
pub enum FramerError {
    #[error("frame of at least {size} bytes exceeds the limit of {limit}")]
    Oversize { size: usize, limit: usize },

    #[error("framer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read the next frame into `buf` (cleared first). `Ok(false)` means EOF.
pub async fn read_frame<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    mode: FrameMode,
    max_size: usize,
    buf: &mut Vec<u8>,
) -> Result<bool, FramerError> {
    buf.clear();
    match mode {
        FrameMode::Line(delim) => read_delimited(reader, delim, max_size, buf).await,
        FrameMode::Syslog => read_syslog_frame(reader, max_size, buf).await,
    }
}

fn trim_in_place(buf: &mut Vec<u8>) {
    let is_pad = |b: u8| b == b' ' || b == b'\r' || b == b'\n';
    while buf.last().is_some_and(|&b| is_pad(b)) {
        buf.pop();
    }
    let start = buf.iter().position(|&b| !is_pad(b)).unwrap_or(buf.len());
    if start > 0 {
        buf.drain(..start);
    }
}

async fn skip_padding<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(false);
        }
        let skip = available
            .iter()
            .take_while(|&&b| b == b' ' || b == b'\r' || b == b'\n')
            .count();
        let done = skip < available.len();
        reader.consume(skip);
        if done {
            return Ok(true);
        }
    }
}

/// Append bytes up to (and consuming, but not storing) `delim`.
async fn take_until<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    delim: u8,
    max_size: usize,
    buf: &mut Vec<u8>,
) -> Result<bool, FramerError> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            // partial frame at EOF is dropped
            return Ok(false);
        }
        match available.iter().position(|&b| b == delim) {
            Some(idx) => {
                if buf.len() + idx > max_size {
                    return Err(FramerError::Oversize {
                        size: buf.len() + idx,
                        limit: max_size,
                    });
                }
                buf.extend_from_slice(&available[..idx]);
                reader.consume(idx + 1);
                return Ok(true);
            }
            None => {
                let len = available.len();
                if buf.len() + len > max_size {
                    return Err(FramerError::Oversize {
                        size: buf.len() + len,
                        limit: max_size,
                    });
                }
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

async fn read_delimited<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    delim: u8,
    max_size: usize,
    buf: &mut Vec<u8>,
) -> Result<bool, FramerError> {
    loop {
        if !take_until(reader, delim, max_size, buf).await? {
            return Ok(false);
        }
        trim_in_place(buf);
        if !buf.is_empty() {
            return Ok(true);
        }
        // empty frame between delimiters, keep scanning
    }
}

async fn read_syslog_frame<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    max_size: usize,
    buf: &mut Vec<u8>,
) -> Result<bool, FramerError> {
    if !skip_padding(reader).await? {
        return Ok(false);
    }

    // scan the first token, up to a space or newline
    let mut token = Vec::new();
    let separator = loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(false);
        }
        match available.iter().position(|&b| b == b' ' || b == b'\n') {
            Some(idx) => {
                if token.len() + idx > max_size {
                    return Err(FramerError::Oversize {
                        size: token.len() + idx,
                        limit: max_size,
                    });
                }
                token.extend_from_slice(&available[..idx]);
                let sep = available[idx];
                reader.consume(idx + 1);
                break sep;
            }
            None => {
                let len = available.len();
                token.extend_from_slice(available);
                reader.consume(len);
                if token.len() > max_size {
                    return Err(FramerError::Oversize {
                        size: token.len(),
                        limit: max_size,
                    });
                }
            }
        }
    };

    let is_count = separator == b' '
        && !token.is_empty()
        && token.iter().all(u8::is_ascii_digit)
        // forbid absurd length tokens before parsing
        && token.len() <= 9;

    if is_count {
        let datalen: usize = std::str::from_utf8(&token)
            .expect("digits are UTF-8")
            .parse()
            .expect("digits parse");
        if datalen > max_size {
            return Err(FramerError::Oversize {
                size: datalen,
                limit: max_size,
            });
        }
        buf.resize(datalen, 0);
        use tokio::io::AsyncReadExt;
        if let Err(e) = reader.read_exact(buf).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(false);
            }
            return Err(e.into());
        }
        trim_in_place(buf);
        return Ok(true);
    }

    // newline fallback: the token is part of the line
    buf.extend_from_slice(&token);
    if separator == b'\n' {
        trim_in_place(buf);
        return Ok(!buf.is_empty() || read_syslog_frame_empty_retry(reader, max_size, buf).await?);
    }
    buf.push(separator);
    if !take_until(reader, b'\n', max_size, buf).await? {
        return Ok(false);
    }
    trim_in_place(buf);
    Ok(true)
}

/// An all-padding line produced an empty frame; scan on for a real one.
async fn read_syslog_frame_empty_retry<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    max_size: usize,
    buf: &mut Vec<u8>,
) -> Result<bool, FramerError> {
    Box::pin(read_syslog_frame(reader, max_size, buf)).await
}

#[cfg(test)]
#[path = "framer_test.rs"]
mod framer_test;
