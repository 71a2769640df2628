//! RELP destination
//!
//! Downstream RELP relay. Sends run ahead of acknowledgements up to the
//! configured window; each response settles the uid recorded for its
//! transaction number.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use skewer_clients::RelpClient;
use skewer_config::DestinationType;
use skewer_model::Uid;

use crate::{BaseDestination, DestEnv, DestError, Destination, OutputMsg};

pub struct RelpDestination {
    base: BaseDestination,
    client: RelpClient,
    pending: HashMap<i32, Uid>,
}

impl RelpDestination {
    pub async fn build(env: &DestEnv) -> Result<RelpDestination, DestError> {
        let base = BaseDestination::new(DestinationType::Relp, env);
        let mut client =
            RelpClient::new(env.config.relp_dest.clone()).map_err(DestError::Client)?;
        match client.connect().await {
            Ok(()) => base.count_conn(true),
            Err(e) => {
                base.count_conn(false);
                return Err(e.into());
            }
        }
        Ok(RelpDestination {
            base,
            client,
            pending: HashMap::new(),
        })
    }

    fn settle(&mut self, txnr: i32, ok: bool) {
        if let Some(uid) = self.pending.remove(&txnr) {
            if ok {
                self.base.ack(uid);
            } else {
                self.base.nack(uid);
            }
        }
    }

    fn fail_all_pending(&mut self) {
        for (_, uid) in self.pending.drain() {
            self.base.nack(uid);
        }
    }

    async fn await_one_response(&mut self) -> Result<(), DestError> {
        match self.client.next_response().await {
            Ok((txnr, ok)) => {
                self.settle(txnr, ok);
                Ok(())
            }
            Err(e) => {
                self.fail_all_pending();
                self.base.dofatal();
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Destination for RelpDestination {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError> {
        for msg in &msgs {
            let uid = msg.message.uid;
            while self.pending.len() >= self.client.window_size() {
                self.await_one_response().await?;
            }
            match self.client.send(&msg.message).await {
                Ok(txnr) => {
                    self.pending.insert(txnr, uid);
                }
                Err(e) if e.is_encoding() => self.base.permerr(uid),
                Err(e) => {
                    self.base.nack(uid);
                    self.fail_all_pending();
                    self.base.dofatal();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        // collect what the peer has already answered, then let the store
        // redeliver the rest
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while !self.pending.is_empty() && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout_at(deadline, self.client.next_response()).await {
                Ok(Ok((txnr, ok))) => self.settle(txnr, ok),
                _ => break,
            }
        }
        self.fail_all_pending();
        self.client.close().await;
    }

    fn fatal(&self) -> CancellationToken {
        self.base.fatal()
    }
}
