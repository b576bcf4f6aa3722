use crate::{config::Config, types::ImagePayload};
use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream returned HTTP {code}")]
    HttpStatus { code: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {detail}")]
    ConnectionFailed { detail: String },

    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("upstream returned an empty body")]
    EmptyBody,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::ConnectionFailed {
                detail: err.to_string(),
            }
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<ImagePayload, FetchError>;
}

/// Streams image bodies over HTTP(S) with a hard size cap.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_payload_bytes: u64,
}

impl HttpFetcher {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.fetch.connect_timeout_seconds.max(1)))
            .read_timeout(Duration::from_secs(cfg.fetch.read_timeout_seconds.max(1)))
            .timeout(cfg.global.per_call_timeout())
            .user_agent(cfg.fetch.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            max_payload_bytes: cfg.fetch.max_payload_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<ImagePayload, FetchError> {
        let limit = self.max_payload_bytes;
        let mut resp = self.client.get(url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                code: status.as_u16(),
            });
        }

        if let Some(declared) = resp.content_length() {
            if declared > limit {
                debug!("rejecting {url}: content-length {declared} > {limit}");
                return Err(FetchError::PayloadTooLarge { limit });
            }
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let initial = resp.content_length().unwrap_or(0).min(limit) as usize;
        let mut buf = BytesMut::with_capacity(initial);
        while let Some(chunk) = resp.chunk().await? {
            if (buf.len() + chunk.len()) as u64 > limit {
                debug!("aborting {url}: body passed {limit} bytes");
                return Err(FetchError::PayloadTooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }

        if buf.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(ImagePayload::new(buf.freeze(), content_type))
    }
}
