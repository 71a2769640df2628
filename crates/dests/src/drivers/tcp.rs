//! TCP destination
//!
//! Stream destinations cannot see whether the peer really consumed a
//! write, so delivery of message N is only acknowledged once message N+1
//! has been written without error. The pending uid rides in `previous`.

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use skewer_clients::SyslogTcpClient;
use skewer_config::DestinationType;
use skewer_model::Uid;

use crate::{BaseDestination, DestEnv, DestError, Destination, OutputMsg};

pub struct TcpDestination {
    base: BaseDestination,
    client: SyslogTcpClient,
    previous: Uid,
    last_flush: Instant,
}

impl TcpDestination {
    pub async fn build(env: &DestEnv) -> Result<TcpDestination, DestError> {
        let base = BaseDestination::new(DestinationType::Tcp, env);
        let mut client = SyslogTcpClient::new(env.config.tcp_dest.clone())
            .map_err(DestError::Client)?;
        match client.connect().await {
            Ok(()) => base.count_conn(true),
            Err(e) => {
                base.count_conn(false);
                return Err(e.into());
            }
        }
        Ok(TcpDestination {
            base,
            client,
            previous: Uid::ZERO,
            last_flush: Instant::now(),
        })
    }

    async fn send_one(&mut self, msg: &OutputMsg) -> Result<(), DestError> {
        let uid = msg.message.uid;
        match self.client.send(&msg.message).await {
            Ok(()) => {
                if !self.previous.is_zero() {
                    self.base.ack(self.previous);
                }
                self.previous = uid;
                Ok(())
            }
            Err(e) if e.is_encoding() => {
                self.base.permerr(uid);
                Ok(())
            }
            Err(e) => {
                self.base.nack(uid);
                if !self.previous.is_zero() {
                    self.base.nack(self.previous);
                    self.previous = Uid::ZERO;
                }
                self.base.dofatal();
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Destination for TcpDestination {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError> {
        for msg in &msgs {
            self.send_one(msg).await?;
        }
        if self.last_flush.elapsed() >= self.client.flush_period() {
            if let Err(e) = self.client.flush().await {
                if !self.previous.is_zero() {
                    self.base.nack(self.previous);
                    self.previous = Uid::ZERO;
                }
                self.base.dofatal();
                return Err(e.into());
            }
            self.last_flush = Instant::now();
        }
        Ok(())
    }

    async fn close(&mut self) {
        match self.client.flush().await {
            Ok(()) => {
                if !self.previous.is_zero() {
                    self.base.ack(self.previous);
                }
            }
            Err(_) => {
                if !self.previous.is_zero() {
                    self.base.nack(self.previous);
                }
            }
        }
        self.previous = Uid::ZERO;
        self.client.close().await;
    }

    fn fatal(&self) -> CancellationToken {
        self.base.fatal()
    }
}
