pub mod fs;
pub mod http;

use crate::{config::Config, types::ImagePayload};
use anyhow::{Result, bail};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use unicode_normalization::UnicodeNormalization;
use url::Url;

pub use fs::FsUploader;
pub use http::HttpUploader;

const MAX_STEM_LEN: usize = 64;

static UNSAFE_KEY_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex")
});

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("storage rejected credentials: {detail}")]
    AuthFailure { detail: String },

    #[error("storage unreachable: {detail}")]
    NetworkFailure { detail: String },

    #[error("storage quota exceeded: {detail}")]
    QuotaExceeded { detail: String },

    #[error("storage rejected write: {detail}")]
    Rejected { detail: String },
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Stores `payload` under `key`, overwriting any previous object, and
    /// returns a stable reference to it.
    async fn upload(&self, key: &str, payload: &ImagePayload) -> Result<String, UploadError>;
}

pub fn build_uploader(cfg: &Config) -> Result<Arc<dyn Uploader>> {
    match cfg.storage.backend.as_str() {
        "fs" => Ok(Arc::new(FsUploader::new(cfg)?)),
        "http" => Ok(Arc::new(HttpUploader::new(cfg)?)),
        other => bail!("unknown storage.backend: {other}"),
    }
}

/// Storage key for one row: `{prefix}/{namespace}/{row:06}-{stem}.{ext}`.
/// Depends only on its inputs, so re-running a manifest overwrites in place.
pub fn derive_key(
    prefix: &str,
    namespace: Option<&str>,
    row_index: usize,
    source_url: &Url,
    extension: &str,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(3);
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        parts.push(ns.to_string());
    }

    let ext = sanitize(extension.trim_start_matches('.'));
    let name = format!("{row_index:06}-{}", filename_stem(source_url));
    if ext.is_empty() {
        parts.push(name);
    } else {
        parts.push(format!("{name}.{ext}"));
    }
    parts.join("/")
}

fn filename_stem(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or_default();
    let stem = match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last,
    };
    let mut clean = sanitize(stem);
    clean.truncate(MAX_STEM_LEN);
    let clean = clean.trim_matches(|c| c == '-' || c == '.').to_string();
    if clean.is_empty() {
        "image".to_string()
    } else {
        clean
    }
}

fn sanitize(s: &str) -> String {
    let normalized: String = s.nfkc().collect();
    UNSAFE_KEY_CHARS
        .replace_all(&normalized, "-")
        .trim_matches(|c| c == '-' || c == '.')
        .to_string()
}

pub(crate) fn public_ref(base: &str, key: &str) -> Option<String> {
    let base = base.trim_end_matches('/');
    (!base.is_empty()).then(|| format!("{base}/{key}"))
}
