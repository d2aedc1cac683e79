//! Error taxonomy for the ingestion, retrieval, and persistence layers.
//!
//! CLI commands and the HTTP server work in `anyhow::Result`; the library
//! components return [`StudyError`] so callers can tell a bad input path
//! from a provider outage.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("text extraction failed: {0}")]
    Extract(String),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("no collection supplied and no default collection configured")]
    MissingCollection,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("flashcard store error: {0}")]
    FlashcardStore(String),

    #[error("web search error: {0}")]
    WebSearch(String),

    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StudyError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StudyError::Persistence {
            path: path.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for StudyError {
    fn from(e: sqlx::Error) -> Self {
        StudyError::Index(e.to_string())
    }
}

pub type StudyResult<T> = std::result::Result<T, StudyError>;
