//! Retrieval facade: query text in, ranked chunks out.
//!
//! One [`Retriever`] is built per collection key the first time it is
//! asked for, then reused for the life of the facade. The cache map is
//! held only long enough to find or insert a key's cell; construction runs
//! behind that key's own [`OnceCell`], so two collections never wait on
//! each other and one collection is never built twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::{StudyError, StudyResult};
use crate::index::SimilarityIndex;
use crate::models::ScoredChunk;

/// Query handle bound to one collection and a fixed top-K.
pub struct Retriever {
    collection: String,
    top_k: usize,
    min_score: f32,
    index: Arc<dyn SimilarityIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// At most `top_k` chunks, most similar first. Empty when nothing
    /// clears the relevance floor.
    pub async fn retrieve(&self, query: &str) -> StudyResult<Vec<ScoredChunk>> {
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        self.index
            .query(&self.collection, &vector, self.top_k, self.min_score)
            .await
    }
}

type RetrieverCell = Arc<OnceCell<Arc<Retriever>>>;

pub struct RetrievalFacade {
    index: Arc<dyn SimilarityIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    min_score: f32,
    default_collection: Option<String>,
    cache: Mutex<HashMap<String, RetrieverCell>>,
}

impl RetrievalFacade {
    pub fn new(
        config: &RetrievalConfig,
        index: Arc<dyn SimilarityIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            index,
            embedder,
            top_k: config.top_k,
            min_score: config.min_score,
            default_collection: config.default_collection.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Ranked chunks for `query` from `collection`, or from the
    /// configured default collection when `collection` is `None`.
    pub async fn retrieve(
        &self,
        query: &str,
        collection: Option<&str>,
    ) -> StudyResult<Vec<ScoredChunk>> {
        let key = self.resolve(collection)?;
        let retriever = self.retriever(&key).await?;
        retriever.retrieve(query).await
    }

    /// The cached retriever for `collection`, building it on first use.
    pub async fn retriever(&self, collection: &str) -> StudyResult<Arc<Retriever>> {
        let cell = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| StudyError::Index("retriever cache lock poisoned".to_string()))?;
            cache.entry(collection.to_string()).or_default().clone()
        };

        let retriever = cell
            .get_or_try_init(|| async {
                debug!(collection = %collection, "building retriever");
                self.index.ensure_collection(collection).await?;
                Ok::<_, StudyError>(Arc::new(Retriever {
                    collection: collection.to_string(),
                    top_k: self.top_k,
                    min_score: self.min_score,
                    index: self.index.clone(),
                    embedder: self.embedder.clone(),
                }))
            })
            .await?;

        Ok(retriever.clone())
    }

    /// Number of collections with a built retriever.
    pub fn cached_count(&self) -> usize {
        self.cache
            .lock()
            .map(|c| c.values().filter(|cell| cell.initialized()).count())
            .unwrap_or(0)
    }

    fn resolve(&self, collection: Option<&str>) -> StudyResult<String> {
        match collection.filter(|c| !c.is_empty()) {
            Some(c) => Ok(c.to_string()),
            None => self
                .default_collection
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or(StudyError::MissingCollection),
        }
    }

    pub fn index(&self) -> &Arc<dyn SimilarityIndex> {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use crate::models::Chunk;
    use async_trait::async_trait;

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> StudyResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("eigen") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    fn facade(default_collection: Option<&str>) -> (RetrievalFacade, Arc<InMemoryIndex>) {
        let index = Arc::new(InMemoryIndex::new());
        let config = RetrievalConfig {
            top_k: 5,
            default_collection: default_collection.map(str::to_string),
            min_score: 0.0,
        };
        (
            RetrievalFacade::new(&config, index.clone(), Arc::new(AxisEmbedder)),
            index,
        )
    }

    fn chunk(i: i64, text: &str) -> Chunk {
        Chunk {
            source: "n.pdf".to_string(),
            page: 0,
            chunk_index: i,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    #[tokio::test]
    async fn missing_collection_without_default() {
        let (facade, _) = facade(None);
        let err = facade.retrieve("eigen", None).await.unwrap_err();
        assert!(matches!(err, StudyError::MissingCollection));
    }

    #[tokio::test]
    async fn falls_back_to_default_collection() {
        let (facade, index) = facade(Some("linear"));
        index
            .add_chunks("linear", &[chunk(0, "eigen stuff")], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        let hits = facade.retrieve("eigen", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].collection, "linear");
    }

    #[tokio::test]
    async fn empty_collection_returns_empty() {
        let (facade, _) = facade(None);
        let hits = facade.retrieve("eigen", Some("fresh")).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn retriever_built_once_per_key() {
        let (facade, _) = facade(None);
        let a = facade.retriever("abc").await.unwrap();
        let b = facade.retriever("abc").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        facade.retriever("ABC").await.unwrap();
        assert_eq!(facade.cached_count(), 2);
    }

    #[tokio::test]
    async fn caps_results_at_top_k() {
        let (facade, index) = facade(None);
        let chunks: Vec<Chunk> = (0..8).map(|i| chunk(i, "eigen")).collect();
        let vectors = vec![vec![1.0, 0.0]; 8];
        index.add_chunks("big", &chunks, &vectors).await.unwrap();
        let hits = facade.retrieve("eigen", Some("big")).await.unwrap();
        assert_eq!(hits.len(), 5);
    }
}
