//! # Study Harness CLI (`study`)
//!
//! ## Usage
//!
//! ```bash
//! study --config ./config/study.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `study init` | Create the database, manifest, and memory file |
//! | `study ingest <pdf>` | Ingest one PDF into a collection |
//! | `study search "<query>"` | Retrieve passages from a collection |
//! | `study collections` | List collections with chunk counts |
//! | `study poll` | Run one ambient cycle over the watch directory |
//! | `study watch` | Poll the watch directory until Ctrl-C |
//! | `study log` | Show recent ambient events |
//! | `study manifest` | Show processed files |
//! | `study decks` | List flashcard decks |
//! | `study serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

use study_harness::commands;
use study_harness::config;
use study_harness::context::AppContext;
use study_harness::server;
use study_harness::telemetry::init_tracing;

/// Study Harness: ingest lecture notes, retrieve passages, build flashcards.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/study.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "study", version, about = "A local-first study assistant")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/study.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema, the manifest, and the memory file.
    ///
    /// Safe to run more than once.
    Init,

    /// Ingest a PDF into a collection.
    Ingest {
        /// Path to the PDF.
        path: PathBuf,

        /// Target collection. Derived from the file name when omitted.
        #[arg(long)]
        collection: Option<String>,
    },

    /// Retrieve the passages most similar to a query.
    Search {
        query: String,

        /// Collection to search. Falls back to `[retrieval].default_collection`.
        #[arg(long)]
        collection: Option<String>,
    },

    /// List collections with their chunk counts.
    Collections,

    /// Run a single ambient cycle and print what happened.
    Poll,

    /// Poll the watch directory until interrupted.
    Watch {
        /// Seconds between cycles. Defaults to `[ambient].poll_interval_seconds`.
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show the newest ambient events.
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the processed-file manifest.
    Manifest,

    /// List flashcard decks.
    Decks,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json, log_level(cli.verbose));

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Collections => {
            commands::run_collections(&cfg).await?;
        }
        command => {
            let ctx = Arc::new(AppContext::from_config(cfg).await?);
            match command {
                Commands::Ingest { path, collection } => {
                    commands::run_ingest(&ctx, &path, collection).await?;
                }
                Commands::Search { query, collection } => {
                    commands::run_search(&ctx, &query, collection.as_deref()).await?;
                }
                Commands::Poll => commands::run_poll(ctx).await?,
                Commands::Watch { interval } => commands::run_watch(ctx, interval).await?,
                Commands::Log { limit } => commands::run_log(&ctx, limit)?,
                Commands::Manifest => commands::run_manifest(&ctx)?,
                Commands::Decks => commands::run_decks(&ctx).await?,
                Commands::Serve => server::run_server(ctx).await?,
                Commands::Init | Commands::Collections => {}
            }
        }
    }

    Ok(())
}
