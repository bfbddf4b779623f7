use crate::{
    aggregator::{ExportFormat, export_one},
    config::Config,
    document::{Document, DocumentKind},
    engine::{EngineHandle, TesseractEngine},
    error::Error,
    orchestrator::BatchOrchestrator,
    report::{BatchReport, entry_reports},
    server,
    util::{ensure_dir, now_rfc3339, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "batch-scribe")]
#[command(about = "Batch text extraction orchestrator (OCR for images, text layer for PDFs)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./batch-scribe.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print recognition engine diagnostics as JSON.
    Doctor {},
    /// Serve the HTTP API.
    Serve {
        /// Overrides `server.listen_addr`.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Extract every input in one batch and write the combined export.
    Run {
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ExportFormat::PlainText)]
        format: ExportFormat,
    },
    /// Encode a piece of text as a downloadable file.
    Export {
        #[arg(long)]
        text: String,
        #[arg(long, value_enum, default_value_t = ExportFormat::PlainText)]
        format: ExportFormat,
        #[arg(long)]
        out: PathBuf,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            doctor(&cfg).await
        }
        Command::Serve { listen } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            let mut cfg = cfg.clone();
            if let Some(addr) = listen {
                cfg.server.listen_addr = addr.clone();
            }
            serve(&cfg).await
        }
        Command::Run {
            input,
            out_dir,
            format,
        } => run(&args, &cfg, input, out_dir.as_deref(), *format).await,
        Command::Export { text, format, out } => {
            let _guard = init_logging(&args, &cfg, None)?;
            let bytes = export_one(text, *format)?;
            std::fs::write(out, bytes).with_context(|| format!("writing {}", out.display()))?;
            info!("wrote {}", out.display());
            Ok(())
        }
    }
}

fn load_config(user: Option<&Path>) -> Result<Config> {
    if let Some(p) = user {
        return Config::load(p);
    }
    for candidate in ["batch-scribe.toml", "batch-scribe.example.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Config::load(&path);
        }
    }
    Ok(Config::default())
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
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

fn build_orchestrator(cfg: &Config) -> Result<BatchOrchestrator> {
    let engine = EngineHandle::new(Box::new(TesseractEngine::new(cfg)));
    Ok(BatchOrchestrator::new(cfg, engine)?)
}

async fn doctor(cfg: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(cfg)?;
    let diag = orchestrator.doctor().await?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

async fn serve(cfg: &Config) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(cfg)?);
    server::serve(cfg, orchestrator).await?;
    Ok(())
}

async fn run(
    args: &Args,
    cfg: &Config,
    inputs: &[PathBuf],
    out_override: Option<&Path>,
    format: ExportFormat,
) -> Result<()> {
    let documents = inputs
        .iter()
        .map(|p| load_input(cfg, p))
        .collect::<Result<Vec<_>>>()?;

    let joined_digests = documents
        .iter()
        .map(|d| d.digest.as_str())
        .collect::<Vec<_>>()
        .join(":");
    let job_id = sha256_hex(joined_digests.as_bytes());

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.output.out_dir));
    let job_dir = out_root.join(&job_id);
    ensure_dir(&job_dir.join("final"))?;
    ensure_dir(&job_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, Some(&job_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!("job_id={job_id} out={}", job_dir.display());

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(job_dir.join("effective-config.toml"), raw)?;
    }

    let orchestrator = build_orchestrator(cfg)?;
    for document in documents {
        if let DocumentKind::Other(_) = document.kind {
            warn!("input is neither an image nor a PDF: {}", document.name);
        }
        orchestrator.submit(document);
    }

    let started = now_rfc3339();
    let summary = orchestrator.start().await;
    if let Err(err) = orchestrator.shutdown().await {
        warn!("engine shutdown failed: {err}");
    }
    let summary = summary.context("batch run failed")?;

    let output_path = match combined_bytes(&orchestrator, format) {
        Ok(bytes) => {
            let name = match format {
                ExportFormat::PlainText => cfg.export.combined_filename.clone(),
                ExportFormat::RichDocument => {
                    format!("{}.{}", cfg.export.single_basename, format.extension())
                }
            };
            let path = job_dir.join("final").join(name);
            std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
            Some(path)
        }
        Err(Error::EmptyExport) => {
            warn!("no document produced text; nothing exported");
            None
        }
        Err(err) => return Err(err.into()),
    };

    if cfg.output.write_report_json {
        let report = BatchReport {
            started,
            finished: now_rfc3339(),
            summary: summary.clone(),
            entries: entry_reports(&orchestrator.entries(), &orchestrator.results().list()),
        };
        std::fs::write(
            job_dir.join("final").join(&cfg.output.report_filename),
            serde_json::to_string_pretty(&report)?,
        )?;
    }

    if cfg.output.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job_id": job_id,
                "job_dir": job_dir,
                "output": output_path,
                "summary": summary,
            }))?
        );
    }

    Ok(())
}

fn combined_bytes(
    orchestrator: &BatchOrchestrator,
    format: ExportFormat,
) -> crate::Result<Vec<u8>> {
    let plain = orchestrator.export_all()?;
    match format {
        ExportFormat::PlainText => Ok(plain),
        ExportFormat::RichDocument => export_one(&String::from_utf8_lossy(&plain), format),
    }
}

fn load_input(cfg: &Config, input: &Path) -> Result<Document> {
    if looks_like_url(&input.display().to_string()) {
        return Err(anyhow!("URL inputs are not supported: {}", input.display()));
    }
    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }
    let size = std::fs::metadata(input)
        .with_context(|| format!("stat input: {}", input.display()))?
        .len();
    if size > cfg.limits.max_document_bytes as u64 {
        return Err(anyhow!(
            "input exceeds max_document_bytes ({size} > {}): {}",
            cfg.limits.max_document_bytes,
            input.display()
        ));
    }

    Document::from_path(input).with_context(|| format!("reading input: {}", input.display()))
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn resolve_log_path(cfg: &Config, job_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(job_dir) = job_dir {
        return Some(job_dir.join("logs").join("batch-scribe.log"));
    }

    Some(PathBuf::from(&cfg.output.out_dir).join("batch-scribe.log"))
}
