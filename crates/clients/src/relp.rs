//! RELP client
//!
//! Speaks RELP v0 toward a downstream relay: `open` handshake, windowed
//! `syslog` commands, `close` on shutdown. Responses are surfaced as
//! `(txnr, ok)` pairs for the destination driver to correlate with the
//! message uids it tracked.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use skewer_config::RelpDestConfig;
use skewer_model::encoders::{encode, EncodingFormat};
use skewer_model::FullMessage;

use crate::ClientError;

const OPEN_OFFERS: &str = "relp_version=0\nrelp_software=skewer\ncommands=syslog";

pub struct RelpClient {
    config: RelpDestConfig,
    format: EncodingFormat,
    writer: Option<OwnedWriteHalf>,
    reader: Option<BufReader<OwnedReadHalf>>,
    next_txnr: i32,
}

impl RelpClient {
    pub fn new(config: RelpDestConfig) -> Result<Self, ClientError> {
        let format = EncodingFormat::parse(&config.format)?;
        Ok(RelpClient {
            config,
            format,
            writer: None,
            reader: None,
            next_txnr: 1,
        })
    }

    /// How many unanswered transactions the owner should allow in flight.
    pub fn window_size(&self) -> usize {
        self.config.window_size.max(1)
    }

    /// Connect and run the `open` handshake.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        let stream = tokio::time::timeout(self.config.conn_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|source| ClientError::Connect {
                target: target.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);
        self.next_txnr = 1;

        let txnr = self.take_txnr();
        self.write_frame(txnr, "open", OPEN_OFFERS.as_bytes()).await?;
        let (resp_txnr, ok) = self.next_response().await?;
        if resp_txnr != txnr || !ok {
            self.disconnect();
            return Err(ClientError::Protocol("open was refused".into()));
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn disconnect(&mut self) {
        self.writer = None;
        self.reader = None;
    }

    fn take_txnr(&mut self) -> i32 {
        let txnr = self.next_txnr;
        self.next_txnr += 1;
        txnr
    }

    async fn write_frame(
        &mut self,
        txnr: i32,
        command: &str,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        let mut frame = format!("{txnr} {command} {}", data.len()).into_bytes();
        if !data.is_empty() {
            frame.push(b' ');
            frame.extend_from_slice(data);
        }
        frame.push(b'\n');
        if let Err(e) = writer.write_all(&frame).await {
            self.disconnect();
            return Err(e.into());
        }
        Ok(())
    }

    /// Send one message; returns the transaction number to correlate the
    /// eventual response with.
    pub async fn send(&mut self, msg: &FullMessage) -> Result<i32, ClientError> {
        let encoded = encode(self.format, msg)?;
        let txnr = self.take_txnr();
        self.write_frame(txnr, "syslog", &encoded).await?;
        Ok(txnr)
    }

    /// Read the next `rsp` frame: `TXNR rsp LEN CODE ...`.
    pub async fn next_response(&mut self) -> Result<(i32, bool), ClientError> {
        let reader = self.reader.as_mut().ok_or(ClientError::NotConnected)?;
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            self.disconnect();
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "relp peer closed",
            )));
        }
        let mut parts = line.split_whitespace();
        let txnr: i32 = parts
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| ClientError::Protocol(format!("bad rsp frame: {line:?}")))?;
        let command = parts.next().unwrap_or("");
        if command != "rsp" {
            return Err(ClientError::Protocol(format!(
                "unexpected command {command:?} from peer"
            )));
        }
        let _datalen = parts.next();
        let code = parts.next().unwrap_or("");
        Ok((txnr, code == "200"))
    }

    pub async fn close(&mut self) {
        if self.writer.is_some() {
            let txnr = self.take_txnr();
            let _ = self.write_frame(txnr, "close", &[]).await;
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
    }
}

#[cfg(test)]
#[path = "relp_test.rs"]
mod relp_test;
