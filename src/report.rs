use crate::{
    compress::CompressError,
    fetch::FetchError,
    manifest::Manifest,
    storage::UploadError,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    Parse,
    Fetch,
    Compress,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    InvalidUrl,
    HttpStatus,
    Timeout,
    ConnectionFailed,
    PayloadTooLarge,
    EmptyBody,
    UnsupportedFormat,
    DecodeFailed,
    EncodeFailed,
    AuthFailure,
    NetworkFailure,
    QuotaExceeded,
    StorageRejected,
    Cancelled,
    DeadlineExceeded,
    Internal,
}

impl From<&FetchError> for FailureReason {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::HttpStatus { .. } => FailureReason::HttpStatus,
            FetchError::Timeout => FailureReason::Timeout,
            FetchError::ConnectionFailed { .. } => FailureReason::ConnectionFailed,
            FetchError::PayloadTooLarge { .. } => FailureReason::PayloadTooLarge,
            FetchError::EmptyBody => FailureReason::EmptyBody,
        }
    }
}

impl From<&CompressError> for FailureReason {
    fn from(err: &CompressError) -> Self {
        match err {
            CompressError::UnsupportedFormat { .. } => FailureReason::UnsupportedFormat,
            CompressError::DecodeFailed { .. } => FailureReason::DecodeFailed,
            CompressError::EncodeFailed { .. } => FailureReason::EncodeFailed,
        }
    }
}

impl From<&UploadError> for FailureReason {
    fn from(err: &UploadError) -> Self {
        match err {
            UploadError::AuthFailure { .. } => FailureReason::AuthFailure,
            UploadError::NetworkFailure { .. } => FailureReason::NetworkFailure,
            UploadError::QuotaExceeded { .. } => FailureReason::QuotaExceeded,
            UploadError::Rejected { .. } => FailureReason::StorageRejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OutcomeResult {
    Success {
        storage_ref: String,
        original_size: u64,
        compressed_size: u64,
    },
    Failure {
        stage: FailureStage,
        reason: FailureReason,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub row_index: usize,
    pub source_url: String,
    pub result: OutcomeResult,
}

impl ItemOutcome {
    pub fn success(
        row_index: usize,
        source_url: impl Into<String>,
        storage_ref: String,
        original_size: u64,
        compressed_size: u64,
    ) -> Self {
        Self {
            row_index,
            source_url: source_url.into(),
            result: OutcomeResult::Success {
                storage_ref,
                original_size,
                compressed_size,
            },
        }
    }

    pub fn failure(
        row_index: usize,
        source_url: impl Into<String>,
        stage: FailureStage,
        reason: FailureReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            source_url: source_url.into(),
            result: OutcomeResult::Failure {
                stage,
                reason,
                detail: detail.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeResult::Success { .. })
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match &self.result {
            OutcomeResult::Failure { reason, .. } => Some(*reason),
            OutcomeResult::Success { .. } => None,
        }
    }

    pub fn failure_stage(&self) -> Option<FailureStage> {
        match &self.result {
            OutcomeResult::Failure { stage, .. } => Some(*stage),
            OutcomeResult::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub started: String,
    pub finished: String,
    pub cancelled: bool,
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub outcomes: Vec<ItemOutcome>,
}

impl JobReport {
    /// Builds the final report. `outcomes` must already be in row order.
    pub fn finalize(
        job_id: String,
        started: String,
        finished: String,
        cancelled: bool,
        outcomes: Vec<ItemOutcome>,
    ) -> Self {
        let mut succeeded = 0;
        let mut original_bytes = 0;
        let mut compressed_bytes = 0;
        for o in &outcomes {
            if let OutcomeResult::Success {
                original_size,
                compressed_size,
                ..
            } = &o.result
            {
                succeeded += 1;
                original_bytes += original_size;
                compressed_bytes += compressed_size;
            }
        }

        Self {
            job_id,
            started,
            finished,
            cancelled,
            total_items: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            original_bytes,
            compressed_bytes,
            outcomes,
        }
    }
}

/// Writes the manifest back out with `output_url` and `error` columns appended.
pub fn write_annotated_manifest(
    manifest: &Manifest,
    report: &JobReport,
    path: &Path,
) -> Result<()> {
    let mut w = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("create annotated manifest: {}", path.display()))?;

    if let Some(headers) = manifest.headers() {
        let mut header: Vec<&str> = headers.iter().collect();
        header.push("output_url");
        header.push("error");
        w.write_record(&header)?;
    }

    for (record, outcome) in manifest.records().zip(&report.outcomes) {
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        match &outcome.result {
            OutcomeResult::Success { storage_ref, .. } => {
                row.push(storage_ref.clone());
                row.push(String::new());
            }
            OutcomeResult::Failure {
                stage,
                reason,
                detail,
            } => {
                row.push(String::new());
                row.push(format!("{stage:?}/{reason:?}: {detail}"));
            }
        }
        w.write_record(&row)?;
    }

    w.flush()
        .with_context(|| format!("flush annotated manifest: {}", path.display()))?;
    Ok(())
}
