//! Syslog-over-TCP client
//!
//! Writes encoded messages to a TCP or unix-stream peer with either
//! octet-counting framing (`len SP body`) or delimiter framing. Writes are
//! buffered; the owner calls [`SyslogTcpClient::flush`] on its flush period
//! and before shutdown.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpStream, UnixStream};

use skewer_config::TcpDestConfig;
use skewer_model::encoders::{encode, EncodingFormat};
use skewer_model::FullMessage;

use crate::ClientError;

enum Stream {
    Tcp(BufWriter<TcpStream>),
    Unix(BufWriter<UnixStream>),
}

pub struct SyslogTcpClient {
    config: TcpDestConfig,
    format: EncodingFormat,
    stream: Option<Stream>,
}

impl SyslogTcpClient {
    pub fn new(config: TcpDestConfig) -> Result<Self, ClientError> {
        let format = EncodingFormat::parse(&config.format)?;
        Ok(SyslogTcpClient {
            config,
            format,
            stream: None,
        })
    }

    fn target(&self) -> String {
        if self.config.unix_socket_path.is_empty() {
            format!("{}:{}", self.config.host, self.config.port)
        } else {
            self.config.unix_socket_path.clone()
        }
    }

    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let target = self.target();
        let stream = if self.config.unix_socket_path.is_empty() {
            let stream = tokio::time::timeout(
                self.config.conn_timeout,
                TcpStream::connect(&target),
            )
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|source| ClientError::Connect {
                target: target.clone(),
                source,
            })?;
            let _ = stream.set_nodelay(true);
            if self.config.keepalive {
                let keepalive =
                    TcpKeepalive::new().with_time(self.config.keepalive_period);
                let _ = SockRef::from(&stream).set_tcp_keepalive(&keepalive);
            }
            Stream::Tcp(BufWriter::new(stream))
        } else {
            let stream = tokio::time::timeout(
                self.config.conn_timeout,
                UnixStream::connect(&target),
            )
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|source| ClientError::Connect {
                target: target.clone(),
                source,
            })?;
            Stream::Unix(BufWriter::new(stream))
        };
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Encode and write one message. A transport error leaves the client
    /// disconnected.
    pub async fn send(&mut self, msg: &FullMessage) -> Result<(), ClientError> {
        let encoded = encode(self.format, msg)?;
        let frame = self.frame(&encoded);
        let result = match self.stream.as_mut() {
            Some(Stream::Tcp(w)) => w.write_all(&frame).await,
            Some(Stream::Unix(w)) => w.write_all(&frame).await,
            None => return Err(ClientError::NotConnected),
        };
        if let Err(e) = result {
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }

    fn frame(&self, encoded: &[u8]) -> Vec<u8> {
        if self.config.line_framing {
            let delim = self.config.frame_delimiter.as_bytes();
            let mut out = Vec::with_capacity(encoded.len() + delim.len());
            out.extend_from_slice(encoded);
            out.extend_from_slice(if delim.is_empty() { b"\n" } else { delim });
            out
        } else {
            let mut out = format!("{} ", encoded.len()).into_bytes();
            out.extend_from_slice(encoded);
            out
        }
    }

    pub async fn flush(&mut self) -> Result<(), ClientError> {
        let result = match self.stream.as_mut() {
            Some(Stream::Tcp(w)) => w.flush().await,
            Some(Stream::Unix(w)) => w.flush().await,
            None => return Ok(()),
        };
        if let Err(e) = result {
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        let _ = self.flush().await;
        match self.stream.take() {
            Some(Stream::Tcp(mut w)) => {
                let _ = w.shutdown().await;
            }
            Some(Stream::Unix(mut w)) => {
                let _ = w.shutdown().await;
            }
            None => {}
        }
    }

    pub fn flush_period(&self) -> Duration {
        self.config.flush_period
    }
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
