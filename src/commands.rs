//! Implementations of the `study` subcommands.
//!
//! Each `run_*` function prints its result to stdout; diagnostics go
//! through `tracing` to stderr.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::ambient::{AmbientHandle, AmbientPoller};
use crate::collection::derive_collection_key;
use crate::config::Config;
use crate::context::AppContext;
use crate::index::{collection_sizes, SqliteIndex};
use crate::manifest::ManifestStore;
use crate::memory::MemoryStore;
use crate::tools::render_chunks;

/// Create the database schema, the manifest, and the memory file.
pub async fn run_init(config: &Config) -> Result<()> {
    SqliteIndex::open(&config.db.path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db.path.display()))?;
    println!("Database initialized at {}", config.db.path.display());

    let manifest = ManifestStore::new(&config.ambient.manifest_file);
    manifest.ensure()?;
    println!("Manifest ready at {}", manifest.path().display());

    let memory = MemoryStore::new(&config.memory.path, config.memory.recent_activity_cap);
    if !memory.path().exists() {
        memory
            .record_activity("init", "Created study workspace")
            .await?;
    }
    println!("Memory ready at {}", memory.path().display());
    Ok(())
}

pub async fn run_ingest(ctx: &AppContext, path: &Path, collection: Option<String>) -> Result<()> {
    let collection = collection.unwrap_or_else(|| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        derive_collection_key(&name)
    });
    let chunks = ctx.ingestor.ingest(path, &collection).await?;
    println!(
        "Ingested {} chunk(s) from {} into '{}'",
        chunks,
        path.display(),
        collection
    );
    Ok(())
}

pub async fn run_search(ctx: &AppContext, query: &str, collection: Option<&str>) -> Result<()> {
    let chunks = ctx.retrieval.retrieve(query, collection).await?;
    for chunk in &chunks {
        println!(
            "[{:.3}] {} p.{} #{}",
            chunk.score, chunk.source, chunk.page, chunk.chunk_index
        );
    }
    if !chunks.is_empty() {
        println!();
    }
    println!("{}", render_chunks(&chunks));
    Ok(())
}

pub async fn run_collections(config: &Config) -> Result<()> {
    let index = SqliteIndex::open(&config.db.path).await?;
    let mut sizes: Vec<(String, i64)> = collection_sizes(index.pool()).await?.into_iter().collect();
    sizes.sort();
    if sizes.is_empty() {
        println!("No collections yet.");
    }
    for (name, chunks) in sizes {
        println!("{:<40} {:>6} chunk(s)", name, chunks);
    }
    Ok(())
}

pub async fn run_poll(ctx: Arc<AppContext>) -> Result<()> {
    let poller = AmbientPoller::new(ctx);
    let summary = poller.poll_once().await?;
    println!("{}", summary.headline());
    for name in &summary.succeeded {
        println!("  ✅ {}", name);
    }
    for name in &summary.ingestion_failed {
        println!("  ❌ {} (ingestion failed)", name);
    }
    for name in &summary.agent_failed {
        println!("  ⚠️ {} (agent failed)", name);
    }
    Ok(())
}

/// Poll until Ctrl-C.
pub async fn run_watch(ctx: Arc<AppContext>, interval_secs: Option<u64>) -> Result<()> {
    let interval = interval_secs.unwrap_or(ctx.config.ambient.poll_interval_seconds);
    if interval == 0 {
        anyhow::bail!("poll interval must be at least one second");
    }
    let poller = Arc::new(AmbientPoller::new(ctx));
    let handle = AmbientHandle::new(poller.clone(), Duration::from_secs(interval));
    handle.start();
    println!(
        "Watching {} every {}s (Ctrl-C to stop)",
        poller.watch_dir().display(),
        interval
    );

    tokio::signal::ctrl_c().await?;
    println!("Stopping after the current cycle...");
    handle.stop().await;
    Ok(())
}

pub fn run_log(ctx: &AppContext, limit: usize) -> Result<()> {
    for event in ctx.event_log.read_recent(limit)? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

pub fn run_manifest(ctx: &AppContext) -> Result<()> {
    let entries = ctx.manifest.entries()?;
    if entries.is_empty() {
        println!("No files processed yet.");
        return Ok(());
    }
    for e in entries {
        println!(
            "{:<40} {:<18} {:<17} {} ({})",
            e.filename, e.status, e.date_processed, e.collection, e.topic
        );
    }
    Ok(())
}

pub async fn run_decks(ctx: &AppContext) -> Result<()> {
    let decks = ctx.flashcards.deck_names().await?;
    for deck in decks {
        println!("{}", deck);
    }
    Ok(())
}
