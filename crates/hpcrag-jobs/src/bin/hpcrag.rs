//! hpcrag: command-line front end for remote embedding and generation jobs.
//!
//! Results are written to the local spool directory; job summaries are
//! printed to stdout as JSON and logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use hpcrag_core::{GenerationParams, GenerationRequest, JobRecord, JobResultData, RemoteTransport};
use hpcrag_jobs::{HpcragConfig, JobManager, JobMonitor, JsonlGraphStore, JsonlVectorStore};
use hpcrag_remote::{SessionPool, SshTransport};

#[derive(Parser)]
#[command(name = "hpcrag")]
#[command(author, version, about = "Run embedding and generation jobs on a Slurm cluster")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: $HPCRAG_CONFIG, then ./hpcrag.toml, then environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a document and store its chunks
    Embed {
        /// Document to upload, named like "Aino 60v K1-1.docx"
        file: PathBuf,

        /// Wait for the job to finish and write back its results
        #[arg(short, long)]
        wait: bool,

        /// Maximum seconds to wait
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
    },

    /// Generate an answer from a query and retrieved context
    Generate {
        #[arg(short, long)]
        query: String,

        /// Context text, or @path to read it from a file
        #[arg(short, long)]
        context: String,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        top_p: Option<f32>,

        /// Wait for the job to finish and print the response
        #[arg(short, long)]
        wait: bool,

        /// Maximum seconds to wait
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
    },

    /// Cancel ALL queued and running jobs of the remote account
    CleanupStalled {
        /// Confirm the account-wide cancellation
        #[arg(long)]
        yes: bool,
    },

    /// Validate and print the effective configuration
    CheckConfig {
        /// Also open an SSH connection to the cluster
        #[arg(long)]
        connect: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "hpcrag=info,...")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hpcrag=info,hpcrag_jobs=info,hpcrag_remote=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("hpcrag.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries command output
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => HpcragConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HpcragConfig::load().context("loading configuration")?,
    };

    if let Commands::CheckConfig { connect } = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        if connect {
            let transport = SshTransport::new(config.cluster.ssh.clone());
            transport.connect().await?;
            let output = transport.exec("hostname").await?;
            transport.close().await;
            eprintln!("Connected to {}", output.stdout_trimmed());
        }
        return Ok(());
    }

    let transports: Vec<Arc<SshTransport>> = (0..config.cluster.sessions)
        .map(|_| Arc::new(SshTransport::new(config.cluster.ssh.clone())))
        .collect();
    let sessions = SessionPool::new(
        transports
            .iter()
            .map(|t| t.clone() as Arc<dyn RemoteTransport>)
            .collect(),
    )?;
    let manager = JobManager::builder(
        sessions,
        config.cluster.work_dir.clone(),
        Arc::new(JsonlVectorStore::new(&config.spool_dir)),
        Arc::new(JsonlGraphStore::new(&config.spool_dir)),
    )
    .with_config(config.jobs.clone())
    .with_cluster(&config.cluster)
    .build();

    let result = dispatch(cli.command, &manager).await;

    for transport in &transports {
        transport.close().await;
    }
    result
}

async fn dispatch(command: Commands, manager: &JobManager) -> anyhow::Result<()> {
    match command {
        Commands::Embed {
            file,
            wait,
            timeout_secs,
        } => {
            let record = manager.submit_embedding(&file).await?;
            print_summary(&record)?;
            if wait {
                finish(manager, record.job_id, Duration::from_secs(timeout_secs)).await?;
            }
        }
        Commands::Generate {
            query,
            context,
            max_tokens,
            temperature,
            top_p,
            wait,
            timeout_secs,
        } => {
            let context = match context.strip_prefix('@') {
                Some(path) => tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading context from {}", path))?,
                None => context,
            };
            let defaults = GenerationParams::default();
            let params = GenerationParams {
                max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
                temperature: temperature.unwrap_or(defaults.temperature),
                top_p: top_p.unwrap_or(defaults.top_p),
            };
            let request = GenerationRequest::new(query, context).with_params(params);

            let record = manager.submit_generation(&request).await?;
            print_summary(&record)?;
            if wait {
                finish(manager, record.job_id, Duration::from_secs(timeout_secs)).await?;
            }
        }
        Commands::CleanupStalled { yes } => {
            if !yes {
                bail!(
                    "cleanup-stalled cancels every job of the remote account; \
                     pass --yes to confirm"
                );
            }
            manager.cleanup_stalled_jobs().await?;
            eprintln!("Cancelled all jobs of the remote account");
        }
        Commands::CheckConfig { .. } => unreachable!("handled before connecting"),
    }
    Ok(())
}

/// Monitor one job to a terminal state, print it, then purge its remote files.
async fn finish(manager: &JobManager, job_id: Uuid, timeout: Duration) -> anyhow::Result<()> {
    let monitor = JobMonitor::new(manager.clone()).start();

    let waited = tokio::select! {
        result = manager.wait_for_terminal(job_id, timeout) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(%job_id, "Interrupted, cancelling job");
            manager.cancel(job_id).await?;
            manager
                .get(job_id)
                .await
                .ok_or(hpcrag_core::Error::JobNotFound(job_id))
        }
    };
    monitor.stop().await?;

    let record = match waited {
        Ok(record) => record,
        Err(e @ hpcrag_core::Error::Timeout(_)) => {
            warn!(%job_id, "Gave up waiting; the remote job keeps running");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    print_summary(&record)?;
    manager.acknowledge(job_id).await?;
    info!(%job_id, "Remote job files purged");

    if let Some(failure) = &record.error {
        bail!("job {} failed: {}", job_id, failure);
    }
    Ok(())
}

fn print_summary(record: &JobRecord) -> anyhow::Result<()> {
    let result = match &record.result {
        Some(JobResultData::Embedding { texts, .. }) => json!({ "chunks": texts.len() }),
        Some(JobResultData::Generation { response }) => json!({ "response": response }),
        None => serde_json::Value::Null,
    };
    let summary = json!({
        "job_id": record.job_id,
        "remote_job_id": record.remote_job_id,
        "kind": record.kind,
        "status": record.status,
        "metadata": record.metadata,
        "submitted_at": record.submitted_at,
        "updated_at": record.updated_at,
        "result": result,
        "error": record.error,
        "warning": record.warning,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
