//! ContextFlow CLI
//!
//! The `contextflow` command drives the analysis worker from a terminal.
//!
//! ## Commands
//!
//! - `analyze`: Run the learning engine over a project's pending documents
//! - `query`: Ask a question against stored context and principles
//! - `upload`: Upload a set of files into a project
//! - `projects`: List known projects
//! - `principles`: Show stored engineering principles

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contextflow_core::{
    normalize_outcome, ContextflowConfig, Decoded, DocCategory, Dispatcher, PrincipleFilter,
    ValidationError,
};
use contextflow_upload::{
    extractor_from_config, BatchReport, FileState, UploadBatch, UploadPipeline,
};
use serde_json::Value;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "contextflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "ContextFlow analysis bridge", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "CONTEXTFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a project's unprocessed documents
    Analyze {
        /// Project ID
        project: String,
    },

    /// Query stored context and principles
    Query {
        /// Question text
        text: String,

        /// Restrict the query to one project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Upload documents (pdf, md, txt) into a project
    Upload {
        /// Project ID
        #[arg(short, long)]
        project: String,

        /// Category for every file (detected from the file name if omitted)
        #[arg(long)]
        category: Option<String>,

        /// Files uploaded at once (default from config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Extra passes over failed files
        #[arg(long, default_value = "0")]
        retries: u32,

        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List known projects
    Projects,

    /// Show stored principles
    Principles {
        /// Principle category
        #[arg(long)]
        category: Option<String>,

        /// Provenance: generic or user_derived
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of principles
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    contextflow_core::telemetry::init_tracing(cli.json, level);

    let config = ContextflowConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let dispatcher = Dispatcher::from_config(&config);

    match cli.command {
        Commands::Analyze { project } => cmd_analyze(&dispatcher, &project).await,
        Commands::Query { text, project } => {
            cmd_query(&dispatcher, &text, project.as_deref()).await
        }
        Commands::Upload {
            project,
            category,
            concurrency,
            retries,
            files,
        } => {
            let mut pipeline_config = config.clone();
            if let Some(n) = concurrency {
                pipeline_config.upload.concurrency = n;
            }
            cmd_upload(
                dispatcher,
                &pipeline_config,
                &project,
                category.as_deref(),
                retries,
                &files,
            )
            .await
        }
        Commands::Projects => cmd_projects(&dispatcher).await,
        Commands::Principles {
            category,
            source,
            limit,
        } => {
            let filter = PrincipleFilter {
                category,
                source,
                limit,
            };
            cmd_principles(&dispatcher, &filter).await
        }
    }
}

/// Unwrap a dispatcher outcome into the worker's `data`, or fail with the
/// user-facing message.
fn unwrap_outcome(outcome: std::result::Result<Decoded, ValidationError>) -> Result<Value> {
    let response = normalize_outcome(outcome);
    if response.is_ok() {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    if let Some(detail) = &response.detail {
        warn!(detail = %detail, "Worker call failed");
    }
    anyhow::bail!(
        "{} (status {})",
        response.message.unwrap_or_else(|| "request failed".to_string()),
        response.status.code()
    )
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Analyze a project
async fn cmd_analyze(dispatcher: &Dispatcher, project: &str) -> Result<()> {
    info!(project_id = %project, "Analyzing project");
    let data = unwrap_outcome(dispatcher.analyze(project).await)?;
    println!("✓ Analysis complete for project {}", project);
    print_json(&data)
}

async fn cmd_query(dispatcher: &Dispatcher, text: &str, project: Option<&str>) -> Result<()> {
    let data = unwrap_outcome(dispatcher.query(text, project).await)?;
    print_json(&data)
}

async fn cmd_projects(dispatcher: &Dispatcher) -> Result<()> {
    let data = unwrap_outcome(dispatcher.list_projects().await)?;
    print_json(&data)
}

async fn cmd_principles(dispatcher: &Dispatcher, filter: &PrincipleFilter) -> Result<()> {
    let data = unwrap_outcome(dispatcher.principles(filter).await)?;
    print_json(&data)
}

/// Upload files into a project, retrying failures up to `retries` extra passes
async fn cmd_upload(
    dispatcher: Dispatcher,
    config: &ContextflowConfig,
    project: &str,
    category: Option<&str>,
    retries: u32,
    files: &[PathBuf],
) -> Result<()> {
    let category = category
        .map(|c| c.parse::<DocCategory>())
        .transpose()
        .context("Invalid --category")?;

    let mut batch = UploadBatch::new(project, &config.upload);
    for path in files {
        match batch.add_file(path).await {
            Ok(id) => {
                if let Some(category) = category {
                    batch.set_category(id, category)?;
                }
            }
            Err(e) => println!("  ✗ {} (skipped: {})", display_name(path), e),
        }
    }
    if batch.is_empty() {
        anyhow::bail!("No files to upload");
    }

    let extractor =
        extractor_from_config(&config.upload).context("Invalid extractor configuration")?;
    let pipeline =
        UploadPipeline::new(dispatcher, extractor).with_concurrency(config.upload.concurrency);

    println!(
        "Uploading {} file(s) to project {} (concurrency {})",
        batch.len(),
        project,
        pipeline.concurrency()
    );
    println!();

    let mut report = pipeline.run(&mut batch).await;
    let mut pass = 0;
    while report.failed > 0 && pass < retries {
        pass += 1;
        println!("Retrying {} failed file(s) (pass {}/{})", report.failed, pass, retries);
        report = pipeline.run(&mut batch).await;
    }

    for entry in batch.entries() {
        match entry.state() {
            FileState::Done => println!(
                "  ✓ {} [{}] ({} chunks)",
                entry.name(),
                entry.category(),
                entry.receipt().map(|r| r.chunk_count).unwrap_or(0)
            ),
            _ => println!(
                "  ✗ {} [{}]: {}",
                entry.name(),
                entry.category(),
                entry.error().unwrap_or("not uploaded")
            ),
        }
    }
    println!();
    print_summary(&report);

    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Upload incomplete: {} of {} file(s) failed", report.failed, batch.len())
    }
}

fn print_summary(report: &BatchReport) {
    println!(
        "Summary: {} uploaded, {} failed ({:?})",
        report.done, report.failed, report.status
    );
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
