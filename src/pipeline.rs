use crate::{
    compress::{Compressor, ImageCompressor},
    config::Config,
    fetch::{Fetcher, HttpFetcher},
    manifest::{Manifest, ManifestRow, ManifestRows},
    report::{FailureReason, FailureStage, ItemOutcome, JobReport},
    storage::{Uploader, build_uploader, derive_key},
    types::{ImagePayload, ItemStatus, WorkItem},
    util::{now_rfc3339, sha256_hex},
};
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs manifest rows through fetch -> compress -> upload on a fixed pool of workers.
pub struct Pipeline {
    cfg: Config,
    fetcher: Arc<dyn Fetcher>,
    compressor: Arc<dyn Compressor>,
    uploader: Arc<dyn Uploader>,
}

/// Deterministic id for a (config, manifest) pair.
pub fn job_id(cfg: &Config, manifest: &Manifest) -> String {
    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    sha256_hex(format!("{}:{}", cfg_hash, manifest.digest()).as_bytes())
}

impl Pipeline {
    pub fn new(
        cfg: &Config,
        fetcher: Arc<dyn Fetcher>,
        compressor: Arc<dyn Compressor>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            fetcher,
            compressor,
            uploader,
        }
    }

    /// Wires up the HTTP fetcher, the image compressor and the configured storage backend.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(
            cfg,
            Arc::new(HttpFetcher::new(cfg)?),
            Arc::new(ImageCompressor::new(cfg)),
            build_uploader(cfg)?,
        ))
    }

    pub async fn run_job(&self, manifest: &Manifest, cancel: CancellationToken) -> JobReport {
        let job_id = job_id(&self.cfg, manifest);
        let started = now_rfc3339();
        let t0 = Instant::now();
        let total = manifest.len();
        let max_workers = self.cfg.global.max_workers.max(1);

        info!(
            "job_id={job_id} rows={total} max_workers={max_workers} quality={}",
            self.cfg.compress.quality
        );

        let namespace = self
            .cfg
            .storage
            .namespace_by_manifest
            .then(|| manifest.digest()[..16].to_string());

        let ctx = Arc::new(Worker {
            fetcher: self.fetcher.clone(),
            compressor: self.compressor.clone(),
            uploader: self.uploader.clone(),
            cpu: Arc::new(Semaphore::new(self.cfg.compress.effective_parallelism().max(1))),
            per_call: self.cfg.global.per_call_timeout(),
            grace: self.cfg.global.cancel_grace(),
            deadline: self.cfg.global.job_deadline().map(|d| t0 + d),
            key_prefix: self.cfg.storage.key_prefix.clone(),
            namespace,
            cancel: cancel.clone(),
        });

        let cursor = Arc::new(Mutex::new(manifest.rows()));
        let (tx, mut rx) = mpsc::unbounded_channel::<ItemOutcome>();

        let handles: Vec<_> = (0..max_workers)
            .map(|id| tokio::spawn(ctx.clone().run(id, cursor.clone(), tx.clone())))
            .collect();
        drop(tx);

        let mut slots: Vec<Option<ItemOutcome>> = vec![None; total];
        while let Some(outcome) = rx.recv().await {
            let row = outcome.row_index;
            match slots.get_mut(row) {
                Some(slot) if slot.is_none() => *slot = Some(outcome),
                Some(_) => warn!("duplicate outcome for row {row}; keeping first"),
                None => error!("outcome for unknown row {row}"),
            }
        }

        for joined in futures::future::join_all(handles).await {
            if let Err(err) = joined {
                error!("worker terminated abnormally: {err}");
            }
        }

        let outcomes = fill_missing(manifest, slots);
        let report = JobReport::finalize(
            job_id,
            started,
            now_rfc3339(),
            cancel.is_cancelled(),
            outcomes,
        );

        info!(
            "job_id={} done in {:?}: {} ok, {} failed, {} -> {} bytes",
            report.job_id,
            t0.elapsed(),
            report.succeeded,
            report.failed,
            report.original_bytes,
            report.compressed_bytes
        );
        report
    }
}

/// Rows whose worker died outside an item never produced an outcome; record them instead of dropping them.
fn fill_missing(manifest: &Manifest, slots: Vec<Option<ItemOutcome>>) -> Vec<ItemOutcome> {
    slots
        .into_iter()
        .zip(manifest.rows())
        .map(|(slot, row)| {
            slot.unwrap_or_else(|| {
                let row_index = row.row_index();
                let url = match &row {
                    ManifestRow::Item(item) => item.source_url().to_string(),
                    ManifestRow::Rejected { raw_url, .. } => raw_url.clone(),
                };
                error!("row {row_index} produced no outcome");
                ItemOutcome::failure(
                    row_index,
                    url,
                    FailureStage::Fetch,
                    FailureReason::Internal,
                    "worker terminated before recording an outcome",
                )
            })
        })
        .collect()
}

struct Worker {
    fetcher: Arc<dyn Fetcher>,
    compressor: Arc<dyn Compressor>,
    uploader: Arc<dyn Uploader>,
    cpu: Arc<Semaphore>,
    per_call: Duration,
    grace: Duration,
    deadline: Option<Instant>,
    key_prefix: String,
    namespace: Option<String>,
    cancel: CancellationToken,
}

struct StageFailure {
    stage: FailureStage,
    reason: FailureReason,
    detail: String,
}

impl StageFailure {
    fn new(stage: FailureStage, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            stage,
            reason,
            detail: detail.into(),
        }
    }
}

struct Stored {
    storage_ref: String,
    original_size: u64,
    compressed_size: u64,
}

impl Worker {
    async fn run(
        self: Arc<Self>,
        id: usize,
        cursor: Arc<Mutex<ManifestRows>>,
        tx: mpsc::UnboundedSender<ItemOutcome>,
    ) {
        debug!("worker {id} started");
        loop {
            let next = cursor.lock().await.next();
            let Some(row) = next else { break };

            let outcome = match row {
                ManifestRow::Rejected {
                    row_index,
                    raw_url,
                    detail,
                } => {
                    warn!("row {row_index} rejected: {detail}");
                    ItemOutcome::failure(
                        row_index,
                        raw_url,
                        FailureStage::Parse,
                        FailureReason::InvalidUrl,
                        detail,
                    )
                }
                ManifestRow::Item(item) if self.cancel.is_cancelled() => ItemOutcome::failure(
                    item.row_index(),
                    item.source_url().as_str(),
                    FailureStage::Fetch,
                    FailureReason::Cancelled,
                    "not dispatched",
                ),
                ManifestRow::Item(item) => self.process(item).await,
            };

            if tx.send(outcome).is_err() {
                break;
            }
        }
        debug!("worker {id} finished");
    }

    async fn process(&self, mut item: WorkItem) -> ItemOutcome {
        let row = item.row_index();
        let url = item.source_url().to_string();

        let finished = {
            let run = AssertUnwindSafe(self.advance(&mut item)).catch_unwind();
            let abandon = async {
                self.cancel.cancelled().await;
                tokio::time::sleep(self.grace).await;
            };
            tokio::select! {
                res = run => Some(res),
                _ = abandon => None,
            }
        };

        match finished {
            Some(Ok(Ok(stored))) => {
                info!(
                    "row {row} stored {} -> {} bytes at {}",
                    stored.original_size, stored.compressed_size, stored.storage_ref
                );
                ItemOutcome::success(
                    row,
                    url,
                    stored.storage_ref,
                    stored.original_size,
                    stored.compressed_size,
                )
            }
            Some(Ok(Err(f))) => {
                item.status = ItemStatus::Failed;
                warn!("row {row} failed at {:?}: {:?} {}", f.stage, f.reason, f.detail);
                ItemOutcome::failure(row, url, f.stage, f.reason, f.detail)
            }
            Some(Err(payload)) => {
                let stage = stage_for(item.status);
                item.status = ItemStatus::Failed;
                let detail = format!("panicked during {stage:?}: {}", panic_message(&*payload));
                error!("row {row} {detail}");
                ItemOutcome::failure(row, url, stage, FailureReason::Internal, detail)
            }
            None => {
                let stage = stage_for(item.status);
                item.status = ItemStatus::Failed;
                warn!("row {row} abandoned during {stage:?} after cancellation");
                ItemOutcome::failure(
                    row,
                    url,
                    stage,
                    FailureReason::Cancelled,
                    "abandoned after cancellation grace period",
                )
            }
        }
    }

    async fn advance(&self, item: &mut WorkItem) -> Result<Stored, StageFailure> {
        self.check_deadline(FailureStage::Fetch)?;
        let raw = self
            .timed(FailureStage::Fetch, self.fetcher.fetch(item.source_url()))
            .await?;
        item.status = ItemStatus::Fetched;
        let original_size = raw.size_bytes();

        self.check_deadline(FailureStage::Compress)?;
        let compressed = self.compress(raw).await?;
        item.status = ItemStatus::Compressed;

        self.check_deadline(FailureStage::Upload)?;
        let key = derive_key(
            &self.key_prefix,
            self.namespace.as_deref(),
            item.row_index(),
            item.source_url(),
            compressed.extension().unwrap_or("bin"),
        );
        let storage_ref = self
            .timed(FailureStage::Upload, self.uploader.upload(&key, &compressed))
            .await?;
        item.status = ItemStatus::Uploaded;

        Ok(Stored {
            storage_ref,
            original_size,
            compressed_size: compressed.size_bytes(),
        })
    }

    /// Consumes the raw payload; it is dropped on the blocking thread once encoding ends.
    async fn compress(&self, raw: ImagePayload) -> Result<ImagePayload, StageFailure> {
        let stage = FailureStage::Compress;
        let permit = self
            .cpu
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| StageFailure::new(stage, FailureReason::Internal, e.to_string()))?;

        let compressor = self.compressor.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            compressor.compress(&raw)
        });

        match tokio::time::timeout(self.per_call, task).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(e))) => Err(StageFailure::new(stage, FailureReason::from(&e), e.to_string())),
            Ok(Err(join)) => Err(StageFailure::new(stage, FailureReason::Internal, join.to_string())),
            Err(_) => Err(StageFailure::new(
                stage,
                FailureReason::Timeout,
                format!("exceeded {:?}", self.per_call),
            )),
        }
    }

    async fn timed<T, E>(
        &self,
        stage: FailureStage,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, StageFailure>
    where
        E: Display,
        for<'e> FailureReason: From<&'e E>,
    {
        match tokio::time::timeout(self.per_call, call).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(StageFailure::new(stage, FailureReason::from(&e), e.to_string())),
            Err(_) => Err(StageFailure::new(
                stage,
                FailureReason::Timeout,
                format!("exceeded {:?}", self.per_call),
            )),
        }
    }

    fn check_deadline(&self, stage: FailureStage) -> Result<(), StageFailure> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StageFailure::new(
                stage,
                FailureReason::DeadlineExceeded,
                "job deadline reached before stage start",
            )),
            _ => Ok(()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn stage_for(status: ItemStatus) -> FailureStage {
    match status {
        ItemStatus::Pending => FailureStage::Fetch,
        ItemStatus::Fetched => FailureStage::Compress,
        _ => FailureStage::Upload,
    }
}
