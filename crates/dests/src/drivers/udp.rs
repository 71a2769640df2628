//! UDP destination
//!
//! Datagrams are fire-and-forget: a successful send is the best delivery
//! signal there is, so the message is acknowledged immediately.

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use skewer_config::DestinationType;
use skewer_model::encoders::{encode, EncodingFormat};

use crate::{BaseDestination, DestEnv, DestError, Destination, OutputMsg};

pub struct UdpDestination {
    base: BaseDestination,
    socket: UdpSocket,
    format: EncodingFormat,
}

impl UdpDestination {
    pub async fn build(env: &DestEnv) -> Result<UdpDestination, DestError> {
        let base = BaseDestination::new(DestinationType::Udp, env);
        let config = &env.config.udp_dest;
        let format = EncodingFormat::parse(&config.format)
            .map_err(|e| DestError::Config(e.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        match socket
            .connect((config.host.as_str(), config.port))
            .await
        {
            Ok(()) => base.count_conn(true),
            Err(e) => {
                base.count_conn(false);
                return Err(e.into());
            }
        }
        Ok(UdpDestination {
            base,
            socket,
            format,
        })
    }
}

#[async_trait]
impl Destination for UdpDestination {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError> {
        for msg in &msgs {
            let uid = msg.message.uid;
            let encoded = match encode(self.format, &msg.message) {
                Ok(bytes) => bytes,
                Err(_) => {
                    self.base.permerr(uid);
                    continue;
                }
            };
            match self.socket.send(&encoded).await {
                Ok(_) => self.base.ack(uid),
                Err(e) => {
                    self.base.nack(uid);
                    self.base.dofatal();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) {}

    fn fatal(&self) -> CancellationToken {
        self.base.fatal()
    }
}
