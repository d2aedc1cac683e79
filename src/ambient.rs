//! Ambient poller: watches a directory and processes new PDFs unattended.
//!
//! # Cycle
//!
//! ```text
//! Idle ──▶ Scanning ──▶ Processing{file} ──▶ … ──▶ Idle
//!             │               │
//!             │               ├─ ingest fails   → ingestion_failed row
//!             │               ├─ agent fails    → agent_failed row
//!             │               └─ both succeed   → success row + memory notes
//!             └─ poll_complete logged every cycle, even with nothing new
//! ```
//!
//! Files are handled one at a time in name order. A file's failure is
//! recorded and the cycle moves on; a failure to write the manifest or the
//! event log aborts the cycle. Only one cycle runs at a time per poller,
//! whether started by the loop or by an on-demand trigger.
//!
//! [`AmbientHandle`] runs the loop on a background task and stops it
//! through a [`CancellationToken`]. Stopping interrupts the wait between
//! cycles; a cycle already in progress runs to completion.

use globset::GlobBuilder;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::collection::{derive_collection_key, topic_from_filename};
use crate::context::AppContext;
use crate::error::{StudyError, StudyResult};
use crate::event_log::events;
use crate::manifest::ManifestStatus;
use crate::memory::{SUBJECTS_AND_COLLECTIONS, UpdateMode};
use crate::orchestrator::{new_thread_id, run_to_completion, AlwaysApprove};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Scanning,
    Processing { file: String },
}

/// Terminal state of one file within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Succeeded,
    IngestFailed,
    AgentFailed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollSummary {
    pub started_at: String,
    pub finished_at: String,
    pub total_pdfs: usize,
    pub already_processed: usize,
    pub new_files: Vec<String>,
    pub succeeded: Vec<String>,
    pub ingestion_failed: Vec<String>,
    pub agent_failed: Vec<String>,
}

impl PollSummary {
    pub fn new_count(&self) -> usize {
        self.new_files.len()
    }

    /// One-line human summary, as logged in `poll_complete`.
    pub fn headline(&self) -> String {
        if self.new_files.is_empty() {
            format!(
                "No new PDFs found ({} total, {} already processed)",
                self.total_pdfs, self.already_processed
            )
        } else {
            format!(
                "Found {} new PDF(s): {}",
                self.new_files.len(),
                self.new_files.join(", ")
            )
        }
    }
}

/// Instruction sent to the orchestrator once a file is ingested.
pub fn ambient_message(filename: &str, topic: &str, collection: &str) -> String {
    format!(
        "I've just added new lecture notes: '{filename}' (topic: {topic}).\n\n\
         The content has been ingested into the '{collection}' collection.\n\n\
         Please:\n\
         1. Retrieve the key content from collection '{collection}'\n\
         2. Generate Anki flashcards covering the main concepts\n\
         3. Create a study guide file for this topic\n"
    )
}

/// PDFs directly inside `dir`, sorted by name. A missing directory holds
/// nothing.
pub fn scan_watch_dir(dir: &Path) -> StudyResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let matcher = GlobBuilder::new("*.pdf")
        .case_insensitive(true)
        .build()
        .map_err(|e| StudyError::InvalidInput(e.to_string()))?
        .compile_matcher();

    let mut pdfs = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            StudyError::persistence(path, io)
        })?;
        if entry.file_type().is_file() && matcher.is_match(entry.file_name()) {
            pdfs.push(entry.into_path());
        }
    }
    Ok(pdfs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub struct AmbientPoller {
    ctx: Arc<AppContext>,
    watch_dir: PathBuf,
    cycle: tokio::sync::Mutex<()>,
    state: RwLock<PollerState>,
    last_summary: RwLock<Option<PollSummary>>,
}

/// Puts the poller back to `Idle` however the cycle ends.
struct IdleOnDrop<'a>(&'a AmbientPoller);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set_state(PollerState::Idle);
    }
}

impl AmbientPoller {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let watch_dir = ctx.config.ambient.watch_directory.clone();
        Self {
            ctx,
            watch_dir,
            cycle: tokio::sync::Mutex::new(()),
            state: RwLock::new(PollerState::Idle),
            last_summary: RwLock::new(None),
        }
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn state(&self) -> PollerState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or(PollerState::Idle)
    }

    pub fn last_summary(&self) -> Option<PollSummary> {
        self.last_summary.read().ok().and_then(|s| s.clone())
    }

    /// Whether a cycle is running right now.
    pub fn is_busy(&self) -> bool {
        self.cycle.try_lock().is_err()
    }

    fn set_state(&self, state: PollerState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    /// Run one cycle, waiting for any cycle already in progress to finish.
    pub async fn poll_once(&self) -> StudyResult<PollSummary> {
        let _cycle = self.cycle.lock().await;
        self.run_cycle().await
    }

    /// Run one cycle unless another is in progress, in which case `None`.
    pub async fn try_poll_once(&self) -> Option<StudyResult<PollSummary>> {
        let _cycle = self.cycle.try_lock().ok()?;
        Some(self.run_cycle().await)
    }

    async fn run_cycle(&self) -> StudyResult<PollSummary> {
        let _idle = IdleOnDrop(self);
        self.set_state(PollerState::Scanning);

        let mut summary = PollSummary {
            started_at: now_rfc3339(),
            ..PollSummary::default()
        };

        let known = self.ctx.manifest.known_filenames()?;
        let discovered = scan_watch_dir(&self.watch_dir)?;
        let new_pdfs: Vec<PathBuf> = discovered
            .iter()
            .filter(|p| !known.contains(&file_name(p)))
            .cloned()
            .collect();

        summary.total_pdfs = discovered.len();
        summary.already_processed = known.len();
        summary.new_files = new_pdfs.iter().map(|p| file_name(p)).collect();

        let mut data = json!({
            "summary": summary.headline(),
            "total_pdfs": summary.total_pdfs,
            "already_processed": summary.already_processed,
            "new_count": summary.new_count(),
        });
        if !summary.new_files.is_empty() {
            data["new_files"] = json!(summary.new_files);
        }
        self.ctx.event_log.log(events::POLL_COMPLETE, data)?;
        info!(total = summary.total_pdfs, new = summary.new_count(), "poll complete");

        for path in &new_pdfs {
            let name = file_name(path);
            self.set_state(PollerState::Processing { file: name.clone() });
            match self.process_file(path, &name).await? {
                FileOutcome::Succeeded => summary.succeeded.push(name),
                FileOutcome::IngestFailed => summary.ingestion_failed.push(name),
                FileOutcome::AgentFailed => summary.agent_failed.push(name),
            }
        }

        summary.finished_at = now_rfc3339();
        if let Ok(mut last) = self.last_summary.write() {
            *last = Some(summary.clone());
        }
        Ok(summary)
    }

    /// Ingest one file and hand it to the orchestrator.
    ///
    /// `Err` only for manifest or event-log write failures.
    pub async fn process_file(&self, path: &Path, filename: &str) -> StudyResult<FileOutcome> {
        let ctx = &self.ctx;
        let topic = topic_from_filename(filename);
        let collection = derive_collection_key(filename);

        ctx.event_log.log(
            events::PROCESSING_STARTED,
            json!({ "file": filename, "topic": topic, "collection": collection }),
        )?;
        info!(file = %filename, collection = %collection, "processing");

        match ctx.ingestor.ingest(path, &collection).await {
            Ok(chunks) => {
                ctx.event_log.log(
                    events::INGESTION_COMPLETE,
                    json!({ "file": filename, "collection": collection, "chunks": chunks }),
                )?;
            }
            Err(e) => {
                warn!(file = %filename, error = %e, "ingestion failed");
                ctx.event_log.log(
                    events::INGESTION_FAILED,
                    json!({ "file": filename, "error": e.to_string() }),
                )?;
                ctx.manifest
                    .append(filename, ManifestStatus::IngestionFailed, &collection, &topic)?;
                return Ok(FileOutcome::IngestFailed);
            }
        }

        let message = ambient_message(filename, &topic, &collection);
        let thread_id = new_thread_id("ambient");
        let run = run_to_completion(
            ctx.orchestrator.as_ref(),
            &AlwaysApprove,
            &thread_id,
            &message,
            ctx.config.orchestrator.max_interrupt_rounds,
        )
        .await;

        match run {
            Ok(_summary) => {
                ctx.event_log.log(
                    events::AGENT_COMPLETE,
                    json!({ "file": filename, "topic": topic, "thread_id": thread_id }),
                )?;
                ctx.manifest
                    .append(filename, ManifestStatus::Success, &collection, &topic)?;
                self.record_memory(filename, &topic, &collection).await;
                Ok(FileOutcome::Succeeded)
            }
            Err(e) => {
                warn!(file = %filename, error = %e, "agent failed");
                ctx.event_log.log(
                    events::AGENT_FAILED,
                    json!({ "file": filename, "error": e.to_string() }),
                )?;
                ctx.manifest
                    .append(filename, ManifestStatus::AgentFailed, &collection, &topic)?;
                Ok(FileOutcome::AgentFailed)
            }
        }
    }

    async fn record_memory(&self, filename: &str, topic: &str, collection: &str) {
        let memory = &self.ctx.memory;
        let activity = format!(
            "Processed '{}' → collection '{}', generated flashcards + study guide",
            filename, collection
        );
        if let Err(e) = memory.record_activity("ambient-ingest", &activity).await {
            warn!(file = %filename, error = %e, "could not record recent activity");
        }
        let subject = format!("- {} — {}", collection, topic);
        if let Err(e) = memory
            .update(SUBJECTS_AND_COLLECTIONS, UpdateMode::Append, &subject)
            .await
        {
            warn!(file = %filename, error = %e, "could not record subject");
        }
    }

    /// Poll every `interval` until `cancel` fires.
    pub async fn run_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        if let Err(e) = self.ctx.manifest.ensure() {
            error!(error = %e, "could not create manifest");
        }
        if let Err(e) = self.ctx.event_log.log(
            events::AMBIENT_STARTED,
            json!({
                "interval_seconds": interval.as_secs(),
                "watch_dir": self.watch_dir.display().to_string(),
            }),
        ) {
            error!(error = %e, "could not write event log");
        }
        info!(watch_dir = %self.watch_dir.display(), interval_secs = interval.as_secs(), "ambient poller started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "poll cycle failed");
                if let Err(log_err) = self
                    .ctx
                    .event_log
                    .log(events::POLL_ERROR, json!({ "error": e.to_string() }))
                {
                    error!(error = %log_err, "could not record poll error");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("ambient poller stopped");
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Start/stop control over a background poll loop.
pub struct AmbientHandle {
    poller: Arc<AmbientPoller>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl AmbientHandle {
    pub fn new(poller: Arc<AmbientPoller>, interval: Duration) -> Self {
        Self {
            poller,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn poller(&self) -> &Arc<AmbientPoller> {
        &self.poller
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if running.as_ref().map(|r| !r.task.is_finished()).unwrap_or(false) {
            return false;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            self.poller
                .clone()
                .run_loop(self.interval, cancel.clone()),
        );
        *running = Some(Running { cancel, task });
        true
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(&self) {
        let current = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some(Running { cancel, task }) = current {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "ambient task ended abnormally");
            }
        }
    }

    pub fn running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().map(|r| !r.task.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }
}
