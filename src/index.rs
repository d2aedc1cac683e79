//! Similarity index: named collections of embedded chunks.
//!
//! The [`SimilarityIndex`] trait is the seam between ingestion/retrieval
//! and storage. Two backends are provided:
//!
//! | Backend | Durability | Used by |
//! |---------|-----------|---------|
//! | [`SqliteIndex`] | on-disk, WAL | CLI, server, ambient poller |
//! | [`InMemoryIndex`] | process lifetime | tests, embedding the library |
//!
//! Both run a brute-force cosine scan over the vectors of one collection.
//! Querying a collection that does not exist, or has no chunks, yields an
//! empty result rather than an error.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{StudyError, StudyResult};
use crate::migrate;
use crate::models::{Chunk, ScoredChunk};

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, collection: &str) -> StudyResult<()>;

    /// Append chunks and their vectors to `collection`, creating it on
    /// first use. Returns the ids assigned to the new chunks, in order.
    ///
    /// Existing chunks are never compared against: adding the same chunk
    /// twice stores it twice.
    async fn add_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> StudyResult<Vec<String>>;

    /// Up to `k` chunks of `collection` scoring at least `min_score`,
    /// highest similarity first.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> StudyResult<Vec<ScoredChunk>>;

    /// All collection names, sorted.
    async fn list_collections(&self) -> StudyResult<Vec<String>>;
}

fn check_lengths(chunks: &[Chunk], vectors: &[Vec<f32>]) -> StudyResult<()> {
    if chunks.len() != vectors.len() {
        return Err(StudyError::Index(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    Ok(())
}

fn rank(mut scored: Vec<ScoredChunk>, k: usize, min_score: f32) -> Vec<ScoredChunk> {
    scored.retain(|c| c.score >= min_score);
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}

// ============ SQLite ============

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Connect to `db_path` and apply the schema.
    pub async fn open(db_path: &Path) -> StudyResult<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SimilarityIndex for SqliteIndex {
    async fn ensure_collection(&self, collection: &str) -> StudyResult<()> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(collection)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> StudyResult<Vec<String>> {
        check_lengths(chunks, vectors)?;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(collection)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let id = uuid::Uuid::new_v4().to_string();

            sqlx::query(
                "INSERT INTO chunks (id, collection, source, page, chunk_index, text, hash, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(collection)
            .bind(&chunk.source)
            .bind(chunk.page as i64)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, collection, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(collection)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;

            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> StudyResult<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source, c.page, c.chunk_index, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.collection = ?
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let page: i64 = row.get("page");
                ScoredChunk {
                    id: row.get("id"),
                    collection: collection.to_string(),
                    source: row.get("source"),
                    page: page.max(0) as usize,
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(scored, k, min_score))
    }

    async fn list_collections(&self) -> StudyResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }
}

// ============ In-memory ============

struct StoredChunk {
    id: String,
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Index held entirely in process memory.
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<BTreeMap<String, Vec<StoredChunk>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks stored under `collection`.
    pub fn chunk_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

fn poisoned() -> StudyError {
    StudyError::Index("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    async fn ensure_collection(&self, collection: &str) -> StudyResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn add_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> StudyResult<Vec<String>> {
        check_lengths(chunks, vectors)?;
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let stored = collections.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let id = uuid::Uuid::new_v4().to_string();
            stored.push(StoredChunk {
                id: id.clone(),
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> StudyResult<Vec<ScoredChunk>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let scored = stored
            .iter()
            .map(|s| ScoredChunk {
                id: s.id.clone(),
                collection: collection.to_string(),
                source: s.chunk.source.clone(),
                page: s.chunk.page,
                chunk_index: s.chunk.chunk_index,
                text: s.chunk.text.clone(),
                score: cosine_similarity(vector, &s.vector),
            })
            .collect();

        Ok(rank(scored, k, min_score))
    }

    async fn list_collections(&self) -> StudyResult<Vec<String>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.keys().cloned().collect())
    }
}

/// Chunk counts per collection, for diagnostics.
pub async fn collection_sizes(pool: &SqlitePool) -> StudyResult<HashMap<String, i64>> {
    let rows = sqlx::query(
        "SELECT co.name, COUNT(c.id) AS n FROM collections co
         LEFT JOIN chunks c ON c.collection = co.name GROUP BY co.name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("name"), row.get::<i64, _>("n")))
        .collect())
}
