//! # a11y-harness CLI (`a11y`)
//!
//! ## Usage
//!
//! ```bash
//! a11y --config ./config/a11y.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `a11y init` | Create the SQLite database and run schema migrations |
//! | `a11y process <url>...` | Fetch, audit, fix and index one or more pages |
//! | `a11y process --html-file <path>` | Same, for a local HTML file |
//! | `a11y issues <page_id>` | List the issues of a page's latest run |
//! | `a11y output <page_id>` | Print the repaired HTML |
//! | `a11y chat <page_id> "<question>"` | Ask a question about a page |
//! | `a11y serve` | Start the HTTP API |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use a11y_harness::{chat, config, migrate, output, pipeline, server};
use a11y_harness_core::models::ProcessMode;

/// a11y-harness: accessibility audit, remediation and page chat for HTML.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/a11y.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "a11y",
    about = "a11y-harness: accessibility audit, remediation and page chat for HTML",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/a11y.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (pages, chunks, chunk_vectors, issues). Idempotent.
    Init,

    /// Audit, fix and index pages.
    ///
    /// Each URL is fetched and processed; re-running a URL replaces the
    /// previous result for the same page. Raw HTML always creates a new page.
    Process {
        /// Page URLs (http or https).
        urls: Vec<String>,

        /// Process a local HTML file instead of (or in addition to) URLs.
        #[arg(long)]
        html_file: Option<PathBuf>,

        /// Embedding breadth: `fast` (24 chunks) or `full` (64 chunks).
        #[arg(long, default_value = "fast")]
        mode: ProcessMode,
    },

    /// List the issues recorded for a page.
    Issues {
        page_id: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the repaired HTML of a page.
    Output {
        page_id: String,

        /// Write to a file instead of stdout.
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Ask a question about a processed page.
    Chat { page_id: String, question: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process {
            urls,
            html_file,
            mode,
        } => {
            pipeline::run_process(&cfg, urls, html_file.as_deref(), mode).await?;
        }
        Commands::Issues { page_id, json } => {
            output::run_issues(&cfg, &page_id, json).await?;
        }
        Commands::Output { page_id, out } => {
            output::run_output(&cfg, &page_id, out.as_deref()).await?;
        }
        Commands::Chat { page_id, question } => {
            chat::run_chat(&cfg, &page_id, &question).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
