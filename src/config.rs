use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub manifest: ManifestSettings,
    #[serde(default)]
    pub fetch: Fetch,
    #[serde(default)]
    pub compress: Compress,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub max_workers: usize,
    pub per_call_timeout_seconds: u64,
    /// 0 disables the job-level deadline.
    pub job_deadline_seconds: u64,
    pub cancel_grace_seconds: u64,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            max_workers: 8,
            per_call_timeout_seconds: 30,
            job_deadline_seconds: 0,
            cancel_grace_seconds: 5,
            print_summary: true,
        }
    }
}

impl Global {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_seconds.max(1))
    }

    pub fn job_deadline(&self) -> Option<Duration> {
        (self.job_deadline_seconds > 0).then(|| Duration::from_secs(self.job_deadline_seconds))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
        }
    }
}

/// Which column of a manifest row holds the image URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlColumn {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSettings {
    pub has_headers: bool,
    pub url_column: UrlColumn,
    /// When non-empty, the header row must match exactly (after trimming).
    pub expected_headers: Vec<String>,
    pub max_manifest_bytes: u64,
    pub max_row_bytes: usize,
    pub require_image_extension: bool,
    pub image_extensions: Vec<String>,
}
impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            has_headers: true,
            url_column: UrlColumn::Name("url".into()),
            expected_headers: Vec::new(),
            max_manifest_bytes: 2 * 1024 * 1024,
            max_row_bytes: 8 * 1024,
            require_image_extension: false,
            image_extensions: vec!["jpg".into(), "jpeg".into(), "png".into(), "gif".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Fetch {
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub max_payload_bytes: u64,
    pub user_agent: String,
}
impl Default for Fetch {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            read_timeout_seconds: 10,
            max_payload_bytes: 25 * 1024 * 1024,
            user_agent: concat!("imgpress/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Compress {
    pub quality: u8,
    /// 0 disables downscaling.
    pub max_dimension: u32,
    pub max_decoded_bytes: u64,
    pub max_input_dimension: u32,
    /// 0 means one permit per available CPU.
    pub max_parallel: usize,
}
impl Default for Compress {
    fn default() -> Self {
        Self {
            quality: 50,
            max_dimension: 0,
            max_decoded_bytes: 256 * 1024 * 1024,
            max_input_dimension: 16_384,
            max_parallel: 0,
        }
    }
}

impl Compress {
    pub fn max_dimension(&self) -> Option<u32> {
        (self.max_dimension > 0).then_some(self.max_dimension)
    }

    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel > 0 {
            return self.max_parallel;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// `fs` or `http`.
    pub backend: String,
    pub root_dir: String,
    pub endpoint: String,
    pub auth_token_env: String,
    pub public_base_url: String,
    pub key_prefix: String,
    pub namespace_by_manifest: bool,
    pub timeout_seconds: u64,
}
impl Default for Storage {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root_dir: "out/images".into(),
            endpoint: "".into(),
            auth_token_env: "IMGPRESS_STORAGE_TOKEN".into(),
            public_base_url: "".into(),
            key_prefix: "compressed".into(),
            namespace_by_manifest: true,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_report_json: bool,
    pub report_filename: String,
    pub write_annotated_manifest: bool,
    pub annotated_manifest_filename: String,
    pub write_index_json: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            report_filename: "report.json".into(),
            write_annotated_manifest: true,
            annotated_manifest_filename: "manifest.out.csv".into(),
            write_index_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}
