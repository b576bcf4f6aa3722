use super::{UploadError, Uploader, public_ref};
use crate::{config::Config, types::ImagePayload, util::ensure_dir};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Writes objects below a local root directory.
pub struct FsUploader {
    root: PathBuf,
    public_base_url: String,
}

impl FsUploader {
    pub fn new(cfg: &Config) -> Result<Self> {
        Self::with_root(Path::new(&cfg.storage.root_dir), &cfg.storage.public_base_url)
    }

    pub fn with_root(root: &Path, public_base_url: &str) -> Result<Self> {
        ensure_dir(root)?;
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize storage root: {}", root.display()))?;
        Ok(Self {
            root,
            public_base_url: public_base_url.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn reference(&self, key: &str, path: &Path) -> String {
        public_ref(&self.public_base_url, key).unwrap_or_else(|| {
            Url::from_file_path(path)
                .map(String::from)
                .unwrap_or_else(|_| path.display().to_string())
        })
    }
}

#[async_trait]
impl Uploader for FsUploader {
    async fn upload(&self, key: &str, payload: &ImagePayload) -> Result<String, UploadError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.part"));

        tokio::fs::write(&tmp, &payload.bytes)
            .await
            .map_err(io_error)?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(err));
        }

        debug!("stored {} bytes at {}", payload.size_bytes(), path.display());
        Ok(self.reference(key, &path))
    }
}

fn io_error(err: std::io::Error) -> UploadError {
    let detail = err.to_string();
    match err.kind() {
        ErrorKind::PermissionDenied => UploadError::AuthFailure { detail },
        ErrorKind::StorageFull | ErrorKind::FileTooLarge => {
            UploadError::QuotaExceeded { detail }
        }
        _ => UploadError::Rejected { detail },
    }
}
