//! HTTP poster
//!
//! One encoded message per request. The destination driver maps the
//! returned status class onto ack/nack/permerr.

use reqwest::{Client, Method, StatusCode};

use skewer_config::HttpDestConfig;

use crate::ClientError;

pub struct HttpPoster {
    client: Client,
    method: Method,
    url: String,
    content_type: String,
}

impl HttpPoster {
    pub fn new(config: &HttpDestConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(config.conn_timeout)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()?;
        let method = config
            .method
            .parse::<Method>()
            .map_err(|_| ClientError::Protocol(format!("bad HTTP method {:?}", config.method)))?;
        Ok(HttpPoster {
            client,
            method,
            url: config.url.clone(),
            content_type: config.content_type.clone(),
        })
    }

    /// The host component, for metric labels.
    pub fn host(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".into())
    }

    pub async fn send(&self, body: Vec<u8>) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .header(reqwest::header::CONTENT_TYPE, &self.content_type)
            .body(body)
            .send()
            .await?;
        Ok(response.status())
    }
}
