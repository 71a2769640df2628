//! HTTP destination
//!
//! One request per message. Status classes map directly onto the store
//! verdicts: 2xx acks, 4xx is a permanent refusal of these bytes, 5xx and
//! transport failures are worth retrying.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use skewer_clients::HttpPoster;
use skewer_config::DestinationType;
use skewer_model::encoders::{encode, EncodingFormat};

use crate::{BaseDestination, DestEnv, DestError, Destination, OutputMsg};

pub struct HttpDestination {
    base: BaseDestination,
    poster: HttpPoster,
    format: EncodingFormat,
    host: String,
}

impl HttpDestination {
    pub async fn build(env: &DestEnv) -> Result<HttpDestination, DestError> {
        let base = BaseDestination::new(DestinationType::Http, env);
        let config = &env.config.http_dest;
        let format = EncodingFormat::parse(&config.format)
            .map_err(|e| DestError::Config(e.to_string()))?;
        let poster = match HttpPoster::new(config) {
            Ok(p) => {
                base.count_conn(true);
                p
            }
            Err(e) => {
                base.count_conn(false);
                return Err(e.into());
            }
        };
        let host = poster.host();
        Ok(HttpDestination {
            base,
            poster,
            format,
            host,
        })
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn send(&mut self, msgs: Vec<OutputMsg>) -> Result<(), DestError> {
        for msg in &msgs {
            let uid = msg.message.uid;
            let body = match encode(self.format, &msg.message) {
                Ok(bytes) => bytes,
                Err(_) => {
                    self.base.permerr(uid);
                    continue;
                }
            };
            match self.poster.send(body).await {
                Ok(status) => {
                    self.base
                        .metrics()
                        .http_status_total
                        .with_label_values(&[&self.host, status.as_str()])
                        .inc();
                    if status.is_success() {
                        self.base.ack(uid);
                    } else if status.is_client_error() {
                        self.base.permerr(uid);
                    } else {
                        self.base.nack(uid);
                    }
                }
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
