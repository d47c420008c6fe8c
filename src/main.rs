//! # sheetfeed CLI
//!
//! ## Usage
//!
//! ```bash
//! sheetfeed --config ./config/sheetfeed.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sheetfeed serve` | Start the HTTP upload server |
//! | `sheetfeed plan <file>` | Show the document and chunk plan for a `.csv.gz` file |
//! | `sheetfeed upload <file>` | Upload a `.csv.gz` file without going through HTTP |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sheetfeed::config::{self, Config};
use sheetfeed::ingest::{self, UploadContext};
use sheetfeed::progress::ProgressMode;
use sheetfeed::server;
use sheetfeed::sheets::create_document_service;
use sheetfeed::stats::RequestStats;

/// sheetfeed: upload gzip-compressed CSV files into spreadsheet documents.
#[derive(Parser)]
#[command(name = "sheetfeed", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sheetfeed.toml`. `plan` falls back to built-in
    /// defaults when the file does not exist.
    #[arg(long, global = true, default_value = "./config/sheetfeed.toml")]
    config: PathBuf,

    /// Progress output for `upload`: off, human, or json (stderr).
    /// Defaults to human when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP upload server on `[server].bind`.
    Serve,

    /// Decode a file and print how it would be split, without creating
    /// or writing any document.
    Plan {
        /// Path to a gzip-compressed CSV file.
        file: PathBuf,
    },

    /// Run the full upload pipeline for a local file.
    Upload {
        /// Path to a gzip-compressed CSV file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sheetfeed=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Plan { file } => {
            let cfg = if cli.config.exists() {
                config::load_config(&cli.config)?
            } else {
                Config::minimal()
            };
            run_plan(&cfg, &file)?;
        }
        Commands::Upload { file } => {
            let cfg = config::load_config(&cli.config)?;
            let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_cli_upload(cfg, &file, mode).await?;
        }
    }

    Ok(())
}

fn run_plan(cfg: &Config, file: &std::path::Path) -> anyhow::Result<()> {
    let mut stats = RequestStats::default();
    let rows = ingest::decode_file(file, &cfg.upload, &mut stats)?;
    let plan = ingest::plan_upload(&rows, &cfg.upload)?;

    println!("plan {}", file.display());
    println!("  rows: {} (+ header)", rows.data_rows());
    println!("  fields: {}", plan.field_count);
    println!("  widest row: {}", plan.column_capacity);
    println!("  documents required: {}", plan.num_documents);
    println!("  max rows per chunk: {}", plan.max_chunk_rows);
    println!("  chunks: {}", plan.num_chunks());
    for (doc, count) in plan.chunks_per_document().iter().enumerate() {
        println!("  document {}: {} chunks", doc + 1, count);
    }
    let overflow = plan
        .num_chunks()
        .saturating_sub(plan.num_documents * cfg.upload.switch_chunk_count);
    if overflow > 0 {
        println!("  clamped onto last document: {} chunks", overflow);
    }
    Ok(())
}

async fn run_cli_upload(cfg: Config, file: &std::path::Path, mode: ProgressMode) -> anyhow::Result<()> {
    let started = Instant::now();
    let service = create_document_service(&cfg)?;
    let ctx = UploadContext {
        config: Arc::new(cfg),
        service,
        progress: mode.reporter(),
    };
    let request_id = format!("cli-{}", uuid::Uuid::new_v4());

    let mut stats = RequestStats::default();
    let rows = ingest::decode_file(file, &ctx.config.upload, &mut stats)?;
    let summary = ingest::run_upload(&ctx, &request_id, rows, stats, started).await?;

    print!("{}", summary.render());
    Ok(())
}
