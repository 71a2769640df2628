//! Length-prefixed frame reader/writer over async streams
//!
//! The reader demarcates frames by the `u32` big-endian length prefix,
//! hands each body to the codec, drops bodies that fail authentication and
//! raises [`KringError::TooManyBadFrames`] after eight consecutive
//! failures. A clean EOF at a frame boundary yields `None`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Frame, FrameCodec, KringError, MAX_FRAME_LEN};

/// Consecutive decode failures tolerated before the channel is declared
/// compromised.
pub const MAX_CONSECUTIVE_BAD_FRAMES: u32 = 8;

/// Reads authenticated frames from a stream.
pub struct FrameReader<R> {
    reader: R,
    codec: FrameCodec,
    consecutive_failures: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, codec: FrameCodec) -> Self {
        FrameReader {
            reader,
            codec,
            consecutive_failures: 0,
        }
    }

    /// Next authenticated frame, or `None` on clean EOF.
    pub async fn next(&mut self) -> Result<Option<Frame>, KringError> {
        loop {
            let mut len_buf = [0u8; 4];
            match self.reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_be_bytes(len_buf);
            if len == 0 || len > MAX_FRAME_LEN {
                return Err(KringError::Oversized(len));
            }

            let mut body = vec![0u8; len as usize];
            self.reader.read_exact(&mut body).await?;

            match self.codec.decode(&body) {
                Ok(frame) => {
                    self.consecutive_failures = 0;
                    return Ok(Some(frame));
                }
                Err(KringError::Io(e)) => return Err(e.into()),
                Err(_) => {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= MAX_CONSECUTIVE_BAD_FRAMES {
                        return Err(KringError::TooManyBadFrames);
                    }
                    // drop the frame, keep scanning
                }
            }
        }
    }
}

/// Writes authenticated frames to a stream.
pub struct FrameWriter<W> {
    writer: W,
    codec: FrameCodec,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, codec: FrameCodec) -> Self {
        FrameWriter { writer, codec }
    }

    pub async fn write(&mut self, frame: &Frame) -> Result<(), KringError> {
        let body = self.codec.encode(frame)?;
        let len = body.len() as u32;
        if len > MAX_FRAME_LEN {
            return Err(KringError::Oversized(len));
        }
        self.writer.write_all(&len.to_be_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "scanner_test.rs"]
mod scanner_test;
