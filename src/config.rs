//! TOML configuration parsing and validation.
//!
//! Every section has documented defaults so a minimal file only needs the
//! `[db]` table. Secrets (API keys) are read from the environment, never
//! from this file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub ambient: AmbientConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub flashcards: FlashcardsConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub default_collection: Option<String>,
    /// Chunks scoring below this cosine similarity are dropped.
    #[serde(default)]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            default_collection: None,
            min_score: 0.0,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama only).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Per-turn ceilings for the budget guard.
///
/// Kept signed so a negative value in the file parses and is clamped to
/// zero by the guard instead of failing the whole config.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_call_limit")]
    pub max_retrieval_calls: i64,
    #[serde(default = "default_call_limit")]
    pub max_web_searches: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_retrieval_calls: default_call_limit(),
            max_web_searches: default_call_limit(),
        }
    }
}

fn default_call_limit() -> i64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AmbientConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_watch_directory")]
    pub watch_directory: PathBuf,
    #[serde(default = "default_manifest_file")]
    pub manifest_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_directory: default_watch_directory(),
            manifest_file: default_manifest_file(),
            log_file: default_log_file(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_watch_directory() -> PathBuf {
    PathBuf::from("./AgentOutput")
}
fn default_manifest_file() -> PathBuf {
    PathBuf::from("./AgentOutput/.processed_manifest.md")
}
fn default_log_file() -> PathBuf {
    PathBuf::from("./AgentOutput/.ambient_log.jsonl")
}
fn default_poll_interval() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
    #[serde(default = "default_recent_activity_cap")]
    pub recent_activity_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            recent_activity_cap: default_recent_activity_cap(),
        }
    }
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("./AgentOutput/.agent_memory.md")
}
fn default_recent_activity_cap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlashcardsConfig {
    #[serde(default = "default_anki_url")]
    pub url: String,
    #[serde(default = "default_anki_version")]
    pub version: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_note_model")]
    pub note_model: String,
    /// Parent deck for `add_cards` when the caller names none.
    #[serde(default = "default_parent_deck")]
    pub parent_deck: String,
}

impl Default for FlashcardsConfig {
    fn default() -> Self {
        Self {
            url: default_anki_url(),
            version: default_anki_version(),
            timeout_secs: default_timeout_secs(),
            note_model: default_note_model(),
            parent_deck: default_parent_deck(),
        }
    }
}

fn default_anki_url() -> String {
    "http://localhost:8765".to_string()
}
fn default_anki_version() -> u32 {
    6
}
fn default_note_model() -> String {
    "Basic".to_string()
}
fn default_parent_deck() -> String {
    "Study".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_results() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Agent runtime endpoint. `None` disables ambient generation.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_orchestrator_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_interrupt_rounds")]
    pub max_interrupt_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_orchestrator_timeout(),
            max_interrupt_rounds: default_max_interrupt_rounds(),
        }
    }
}

fn default_orchestrator_timeout() -> u64 {
    600
}
fn default_max_interrupt_rounds() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Tool sessions unused for this long are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_session_idle_secs() -> u64 {
    3600
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// All-defaults config with every on-disk path placed under `root`.
    pub fn minimal(root: &Path) -> Self {
        let agent_output = root.join("AgentOutput");
        Self {
            db: DbConfig {
                path: root.join("data").join("study.sqlite"),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            limits: LimitsConfig::default(),
            ambient: AmbientConfig {
                watch_directory: agent_output.clone(),
                manifest_file: agent_output.join(".processed_manifest.md"),
                log_file: agent_output.join(".ambient_log.jsonl"),
                ..AmbientConfig::default()
            },
            memory: MemoryConfig {
                path: agent_output.join(".agent_memory.md"),
                ..MemoryConfig::default()
            },
            flashcards: FlashcardsConfig::default(),
            web_search: WebSearchConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.ambient.poll_interval_seconds == 0 {
        anyhow::bail!("ambient.poll_interval_seconds must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.web_search.provider.as_str() {
        "disabled" | "tavily" => {}
        other => anyhow::bail!(
            "Unknown web_search provider: '{}'. Must be disabled or tavily.",
            other
        ),
    }

    Ok(())
}
