use super::{UploadError, Uploader, public_ref};
use crate::{config::Config, types::ImagePayload};
use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, warn};

/// PUTs objects to `{endpoint}/{key}`. Works against S3-compatible gateways
/// and presigned-prefix endpoints that accept a bearer token.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    public_base_url: String,
}

impl HttpUploader {
    pub fn new(cfg: &Config) -> Result<Self> {
        let endpoint = cfg.storage.endpoint.trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            bail!("storage.endpoint is required for the http backend");
        }

        let token = std::env::var(&cfg.storage.auth_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            warn!(
                "{} is unset; uploading without credentials",
                cfg.storage.auth_token_env
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.storage.timeout_seconds.max(1)))
            .user_agent(cfg.fetch.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token,
            public_base_url: cfg.storage.public_base_url.clone(),
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, key: &str, payload: &ImagePayload) -> Result<String, UploadError> {
        let url = format!("{}/{}", self.endpoint, key);

        let mut req = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, payload.content_type.as_str())
            .body(payload.bytes.clone());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| UploadError::NetworkFailure {
            detail: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            debug!("PUT {url} -> {status}");
            return Ok(public_ref(&self.public_base_url, key).unwrap_or(url));
        }

        let detail = format!("PUT {url} returned {status}");
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UploadError::AuthFailure { detail },
            StatusCode::PAYLOAD_TOO_LARGE | StatusCode::INSUFFICIENT_STORAGE => {
                UploadError::QuotaExceeded { detail }
            }
            _ => UploadError::Rejected { detail },
        })
    }
}
