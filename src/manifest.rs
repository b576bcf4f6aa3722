use crate::{
    config::{Config, UrlColumn},
    types::WorkItem,
    util::sha256_hex,
};
use bytes::Bytes;
use csv::{ReaderBuilder, StringRecord};
use std::io::Cursor;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest: {detail}")]
    MalformedStructure { detail: String },

    #[error("manifest has no data rows")]
    EmptyManifest,

    #[error("row {row_index} exceeds max_row_bytes ({limit})")]
    RowTooLong { row_index: usize, limit: usize },

    #[error("manifest is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

/// A validated CSV manifest. Iterating it re-reads the retained bytes, so
/// [`Manifest::rows`] can be called any number of times.
#[derive(Debug, Clone)]
pub struct Manifest {
    raw: Bytes,
    has_headers: bool,
    headers: Option<StringRecord>,
    url_column: usize,
    len: usize,
    image_extensions: Option<Vec<String>>,
    digest: String,
}

/// One data row, either ready for the pipeline or rejected up front.
#[derive(Debug, Clone)]
pub enum ManifestRow {
    Item(WorkItem),
    Rejected {
        row_index: usize,
        raw_url: String,
        detail: String,
    },
}

impl ManifestRow {
    pub fn row_index(&self) -> usize {
        match self {
            ManifestRow::Item(item) => item.row_index(),
            ManifestRow::Rejected { row_index, .. } => *row_index,
        }
    }
}

impl Manifest {
    pub fn parse(raw: impl Into<Bytes>, cfg: &Config) -> Result<Self, ManifestError> {
        let raw = raw.into();
        let settings = &cfg.manifest;

        let size = raw.len() as u64;
        if settings.max_manifest_bytes > 0 && size > settings.max_manifest_bytes {
            return Err(ManifestError::TooLarge {
                size,
                limit: settings.max_manifest_bytes,
            });
        }

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ManifestError::EmptyManifest);
        }

        let mut rdr = reader(&raw, settings.has_headers);

        let headers = if settings.has_headers {
            let h = rdr.headers().map_err(malformed)?.clone();
            if !settings.expected_headers.is_empty() {
                let got: Vec<&str> = h.iter().map(str::trim).collect();
                let want: Vec<&str> = settings.expected_headers.iter().map(|s| s.trim()).collect();
                if got != want {
                    return Err(ManifestError::MalformedStructure {
                        detail: format!("headers {got:?} do not match expected {want:?}"),
                    });
                }
            }
            Some(h)
        } else {
            None
        };

        let url_column = resolve_url_column(&settings.url_column, headers.as_ref())?;

        let mut len = 0usize;
        for rec in rdr.records() {
            let rec = rec.map_err(malformed)?;
            if is_blank(&rec) {
                continue;
            }
            let row_bytes = rec.as_slice().len() + rec.len().saturating_sub(1);
            if settings.max_row_bytes > 0 && row_bytes > settings.max_row_bytes {
                return Err(ManifestError::RowTooLong {
                    row_index: len,
                    limit: settings.max_row_bytes,
                });
            }
            len += 1;
        }

        if len == 0 {
            return Err(ManifestError::EmptyManifest);
        }

        let image_extensions = settings.require_image_extension.then(|| {
            settings
                .image_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        });

        let digest = sha256_hex(&raw);

        Ok(Self {
            raw,
            has_headers: settings.has_headers,
            headers,
            url_column,
            len,
            image_extensions,
            digest,
        })
    }

    /// Number of data rows (valid and rejected).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn headers(&self) -> Option<&StringRecord> {
        self.headers.as_ref()
    }

    /// SHA-256 of the raw manifest bytes, hex encoded.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Data records in row order, blank lines skipped.
    pub fn records(&self) -> impl Iterator<Item = StringRecord> + Send + 'static {
        reader(&self.raw, self.has_headers)
            .into_records()
            .filter_map(Result::ok)
            .filter(|r| !is_blank(r))
    }

    pub fn rows(&self) -> ManifestRows {
        ManifestRows {
            records: Box::new(self.records()),
            next_index: 0,
            url_column: self.url_column,
            image_extensions: self.image_extensions.clone(),
        }
    }
}

/// Lazy row iterator returned by [`Manifest::rows`].
pub struct ManifestRows {
    records: Box<dyn Iterator<Item = StringRecord> + Send>,
    next_index: usize,
    url_column: usize,
    image_extensions: Option<Vec<String>>,
}

impl Iterator for ManifestRows {
    type Item = ManifestRow;

    fn next(&mut self) -> Option<ManifestRow> {
        let rec = self.records.next()?;
        let row_index = self.next_index;
        self.next_index += 1;

        let raw_url = rec.get(self.url_column).unwrap_or_default().trim();
        match validate_url(raw_url, self.image_extensions.as_deref()) {
            Ok(url) => Some(ManifestRow::Item(WorkItem::new(row_index, url))),
            Err(detail) => Some(ManifestRow::Rejected {
                row_index,
                raw_url: raw_url.to_string(),
                detail,
            }),
        }
    }
}

fn reader(raw: &Bytes, has_headers: bool) -> csv::Reader<Cursor<Bytes>> {
    ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(Cursor::new(raw.clone()))
}

fn malformed(err: csv::Error) -> ManifestError {
    ManifestError::MalformedStructure {
        detail: err.to_string(),
    }
}

fn is_blank(rec: &StringRecord) -> bool {
    rec.len() <= 1 && rec.get(0).is_none_or(|f| f.trim().is_empty())
}

fn resolve_url_column(
    col: &UrlColumn,
    headers: Option<&StringRecord>,
) -> Result<usize, ManifestError> {
    match (col, headers) {
        (UrlColumn::Index(i), Some(h)) if *i >= h.len() => Err(ManifestError::MalformedStructure {
            detail: format!("url column {i} is out of range for {} headers", h.len()),
        }),
        (UrlColumn::Index(i), _) => Ok(*i),
        (UrlColumn::Name(name), Some(h)) => h
            .iter()
            .position(|f| f.trim().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ManifestError::MalformedStructure {
                detail: format!("url column {name:?} not found in headers"),
            }),
        (UrlColumn::Name(name), None) => Err(ManifestError::MalformedStructure {
            detail: format!("url column {name:?} selected by name but manifest has no header row"),
        }),
    }
}

fn validate_url(raw: &str, image_extensions: Option<&[String]>) -> Result<Url, String> {
    if raw.is_empty() {
        return Err("missing url".into());
    }
    let pieces = raw.split(',').count();
    if pieces > 1 && raw.split(',').all(|p| has_web_scheme(p.trim())) {
        return Err(format!("cell holds {pieces} urls; expected one per row"));
    }
    let url = Url::parse(raw).map_err(|e| format!("not a url: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme: {}", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err("url has no host".into());
    }
    if let Some(exts) = image_extensions {
        let last = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let ok = last
            .rsplit_once('.')
            .is_some_and(|(_, ext)| exts.iter().any(|e| e == ext));
        if !ok {
            return Err(format!("not an image url (allowed: {})", exts.join(",")));
        }
    }
    Ok(url)
}

fn has_web_scheme(s: &str) -> bool {
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
