use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    Fetched,
    Compressed,
    Uploaded,
    Failed,
}

/// One valid manifest row on its way through the pipeline.
#[derive(Debug, Clone)]
pub struct WorkItem {
    row_index: usize,
    source_url: Url,
    pub status: ItemStatus,
}

impl WorkItem {
    pub fn new(row_index: usize, source_url: Url) -> Self {
        Self {
            row_index,
            source_url,
            status: ItemStatus::Pending,
        }
    }

    pub fn row_index(&self) -> usize {
        self.row_index
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }
}

#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Bytes,
    pub content_type: String,
}

impl ImagePayload {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// File extension implied by the content type, if it is an image type we know.
    pub fn extension(&self) -> Option<&'static str> {
        let mime = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/gif" => Some("gif"),
            "image/webp" => Some("webp"),
            _ => None,
        }
    }
}
