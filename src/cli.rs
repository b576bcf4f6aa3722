use crate::{
    config::Config,
    manifest::{Manifest, ManifestRow},
    pipeline::{Pipeline, job_id},
    report::write_annotated_manifest,
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "imgpress")]
#[command(about = "Batch image recompression pipeline (CSV manifest -> fetch -> compress -> upload)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./imgpress.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a manifest and report which rows would be processed.
    Validate {
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Process every row of a manifest and write the job report.
    Run {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = if cfg_path.exists() {
        Config::load(&cfg_path)?
    } else {
        Config::default()
    };

    match &args.cmd {
        Command::Validate { manifest } => {
            let _guard = init_logging(&args, &cfg, None)?;
            validate(&cfg, manifest)
        }
        Command::Run { manifest, out_dir } => run(&args, &cfg, manifest, out_dir.as_deref()).await,
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("imgpress.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("imgpress.example.toml")
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn load_manifest(cfg: &Config, path: &Path) -> Result<Manifest> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("manifest does not exist: {}", path.display()))?;
    if cfg.manifest.max_manifest_bytes > 0 && meta.len() > cfg.manifest.max_manifest_bytes {
        return Err(anyhow!(
            "manifest exceeds max_manifest_bytes ({} > {}): {}",
            meta.len(),
            cfg.manifest.max_manifest_bytes,
            path.display()
        ));
    }

    let raw = std::fs::read(path).with_context(|| format!("reading manifest: {}", path.display()))?;
    Manifest::parse(raw, cfg).with_context(|| format!("parsing manifest: {}", path.display()))
}

/// Warning for manifest paths that do not look like CSV. Emitted once logging is up.
pub fn manifest_format_warning(path: &Path) -> Option<String> {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => None,
        Some(_) => Some(format!(
            "manifest is not a .csv file; parsing as CSV: {}",
            path.display()
        )),
        None => Some(format!(
            "manifest has no extension; assuming CSV: {}",
            path.display()
        )),
    }
}

fn validate(cfg: &Config, path: &Path) -> Result<()> {
    if let Some(msg) = manifest_format_warning(path) {
        warn!("{msg}");
    }
    let manifest = load_manifest(cfg, path)?;

    let mut valid = 0usize;
    let mut rejected = Vec::new();
    for row in manifest.rows() {
        match row {
            ManifestRow::Item(_) => valid += 1,
            ManifestRow::Rejected {
                row_index,
                raw_url,
                detail,
            } => rejected.push(serde_json::json!({
                "row_index": row_index,
                "url": raw_url,
                "detail": detail,
            })),
        }
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "manifest": path,
            "rows": manifest.len(),
            "valid": valid,
            "rejected": rejected,
        }))?
    );
    Ok(())
}

async fn run(args: &Args, cfg: &Config, input: &Path, out_override: Option<&Path>) -> Result<()> {
    let manifest = load_manifest(cfg, input)?;
    let job_id = job_id(cfg, &manifest);

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let job_dir = out_root.join(&job_id);
    ensure_dir(&job_dir)?;
    ensure_dir(&job_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, &job_dir);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    if let Some(msg) = manifest_format_warning(input) {
        warn!("{msg}");
    }
    info!("job_id={job_id} out={}", job_dir.display());

    let pipeline = Pipeline::from_config(cfg)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling job");
            on_signal.cancel();
        }
    });

    let started = now_rfc3339();
    let report = pipeline.run_job(&manifest, cancel).await;

    if cfg.output.write_report_json {
        std::fs::write(
            job_dir.join(&cfg.output.report_filename),
            serde_json::to_string_pretty(&report)?,
        )?;
    }

    if cfg.output.write_annotated_manifest {
        write_annotated_manifest(
            &manifest,
            &report,
            &job_dir.join(&cfg.output.annotated_manifest_filename),
        )?;
    }

    if cfg.output.write_index_json {
        let index = serde_json::json!({
            "job_id": job_id,
            "manifest": input,
            "started": started,
            "finished": now_rfc3339(),
            "report": cfg.output.report_filename,
            "annotated_manifest": cfg.output.annotated_manifest_filename,
        });
        std::fs::write(job_dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
    }

    if cfg.global.print_summary {
        let status = if report.cancelled {
            "cancelled"
        } else if report.failed > 0 {
            "partial"
        } else {
            "ok"
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job_id": job_id,
                "job_dir": job_dir,
                "status": status,
                "total": report.total_items,
                "succeeded": report.succeeded,
                "failed": report.failed,
            }))?
        );
    }

    Ok(())
}

fn resolve_log_path(cfg: &Config, job_dir: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(job_dir.join("logs").join("imgpress.log"))
}
