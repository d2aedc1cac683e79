//! Core data models that flow through ingestion and retrieval.

use serde::Serialize;

/// A span of page text produced by the splitter, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Source file name the text came from.
    pub source: String,
    /// Zero-based page the span was cut from.
    pub page: usize,
    /// Position of this chunk within its document, contiguous from 0.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk returned by a similarity query, most relevant first.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub collection: String,
    pub source: String,
    pub page: usize,
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
}
