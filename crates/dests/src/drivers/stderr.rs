//! Stderr destination
//!
//! The test destination: every message becomes one line on stderr.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use skewer_config::DestinationType;
use skewer_model::encoders::{encode, EncodingFormat};

use crate::{BaseDestination, DestEnv, DestError, Destination, OutputMsg};

pub struct StderrDestination {
    base: BaseDestination,
    format: EncodingFormat,
    stderr: tokio::io::Stderr,
}

impl StderrDestination {
    pub async fn build(env: &DestEnv) -> Result<StderrDestination, DestError> {
        let base = BaseDestination::new(DestinationType::Stderr, env);
        let format = EncodingFormat::parse(&env.config.stderr_dest.format)
            .map_err(|e| DestError::Config(e.to_string()))?;
        base.count_conn(true);
        Ok(StderrDestination {
            base,
            format,
            stderr: tokio::io::stderr(),
        })
    }
}

#[async_trait]
impl Destination for StderrDestination {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError> {
        for msg in &msgs {
            let uid = msg.message.uid;
            let mut line = match encode(self.format, &msg.message) {
                Ok(bytes) => bytes,
                Err(_) => {
                    self.base.permerr(uid);
                    continue;
                }
            };
            line.push(b'\n');
            match self.stderr.write_all(&line).await {
                Ok(()) => self.base.ack(uid),
                Err(e) => {
                    self.base.nack(uid);
                    self.base.dofatal();
                    return Err(e.into());
                }
            }
        }
        let _ = self.stderr.flush().await;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.stderr.flush().await;
    }

    fn fatal(&self) -> CancellationToken {
        self.base.fatal()
    }
}
