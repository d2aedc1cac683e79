//! Ingestion pipeline: one document in, embedded chunks out.
//!
//! Flow: validate path → load pages → split → embed → add to index.
//! Validation happens before any I/O against the index, and every chunk is
//! embedded before the first write, so an embedding failure leaves the
//! collection untouched. Provider failures are returned as-is; nothing in
//! this module retries.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::chunk::split_pages;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{StudyError, StudyResult};
use crate::extract::{extension_of, DocumentLoader, PdfLoader};
use crate::index::SimilarityIndex;

/// Texts sent to the embedding provider per request.
const EMBED_BATCH_SIZE: usize = 64;

/// Anything that can turn a file into chunks of a collection.
///
/// The ambient poller and the `ingest_pdf_tool` depend on this trait
/// rather than on [`IngestionPipeline`] directly.
#[async_trait]
pub trait DocumentIngestor: Send + Sync {
    /// Ingest `path` into `collection`, returning the number of chunks written.
    async fn ingest(&self, path: &Path, collection: &str) -> StudyResult<usize>;
}

pub struct IngestionPipeline {
    loaders: Vec<Arc<dyn DocumentLoader>>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl IngestionPipeline {
    /// Pipeline with the PDF loader registered.
    pub fn new(
        chunking: &ChunkingConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
    ) -> Self {
        Self {
            loaders: vec![Arc::new(PdfLoader)],
            embedder,
            index,
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
        }
    }

    /// Replace the registered loaders.
    pub fn with_loaders(mut self, loaders: Vec<Arc<dyn DocumentLoader>>) -> Self {
        self.loaders = loaders;
        self
    }

    fn loader_for(&self, path: &Path) -> StudyResult<Arc<dyn DocumentLoader>> {
        let extension = extension_of(path).unwrap_or_default();
        self.loaders
            .iter()
            .find(|l| l.supports(&extension))
            .cloned()
            .ok_or_else(|| {
                StudyError::UnsupportedFormat(if extension.is_empty() {
                    path.display().to_string()
                } else {
                    format!(".{}", extension)
                })
            })
    }
}

#[async_trait]
impl DocumentIngestor for IngestionPipeline {
    async fn ingest(&self, path: &Path, collection: &str) -> StudyResult<usize> {
        if !path.is_file() {
            return Err(StudyError::NotFound(path.to_path_buf()));
        }
        let loader = self.loader_for(path)?;

        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || loader.load(&owned))
            .await
            .map_err(|e| StudyError::Extract(format!("loader task failed: {}", e)))??;

        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let chunks = split_pages(&source, &pages, self.chunk_size, self.chunk_overlap);
        debug!(file = %source, pages = pages.len(), chunks = chunks.len(), "split document");

        if chunks.is_empty() {
            return Err(StudyError::Extract(format!(
                "no extractable text in {}",
                source
            )));
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(StudyError::EmbeddingProvider(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }

        let ids = self.index.add_chunks(collection, &chunks, &vectors).await?;
        info!(file = %source, collection = %collection, chunks = ids.len(), "ingested document");

        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::index::InMemoryIndex;
    use tempfile::TempDir;

    struct TextLoader;

    impl DocumentLoader for TextLoader {
        fn supports(&self, extension: &str) -> bool {
            extension == "txt"
        }
        fn load(&self, path: &Path) -> StudyResult<Vec<String>> {
            let text = std::fs::read_to_string(path).map_err(|e| StudyError::Extract(e.to_string()))?;
            Ok(text.split('\u{c}').map(str::to_string).collect())
        }
    }

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> StudyResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn pipeline(embedder: Arc<dyn Embedder>, index: Arc<InMemoryIndex>) -> IngestionPipeline {
        let chunking = ChunkingConfig {
            chunk_size: 40,
            chunk_overlap: 5,
        };
        IngestionPipeline::new(&chunking, embedder, index).with_loaders(vec![Arc::new(TextLoader)])
    }

    #[tokio::test]
    async fn ingests_pages_into_collection() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "First page has words.\u{c}Second page has more words in it.").unwrap();

        let index = Arc::new(InMemoryIndex::new());
        let count = pipeline(Arc::new(LengthEmbedder), index.clone())
            .ingest(&path, "notes")
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(index.chunk_count("notes"), 2);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let index = Arc::new(InMemoryIndex::new());
        let err = pipeline(Arc::new(LengthEmbedder), index.clone())
            .ingest(Path::new("/nonexistent/notes.txt"), "notes")
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::NotFound(_)));
        assert!(index.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("slides.pptx");
        std::fs::write(&path, "x").unwrap();

        let index = Arc::new(InMemoryIndex::new());
        let err = pipeline(Arc::new(LengthEmbedder), index.clone())
            .ingest(&path, "slides")
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::UnsupportedFormat(ref e) if e == ".pptx"));
        assert!(index.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "Some text to embed.").unwrap();

        let index = Arc::new(InMemoryIndex::new());
        let err = pipeline(Arc::new(DisabledEmbedder), index.clone())
            .ingest(&path, "notes")
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::EmbeddingProvider(_)));
        assert_eq!(index.chunk_count("notes"), 0);
    }

    #[tokio::test]
    async fn empty_document_fails_extraction() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blank.txt");
        std::fs::write(&path, "   ").unwrap();

        let index = Arc::new(InMemoryIndex::new());
        let err = pipeline(Arc::new(LengthEmbedder), index)
            .ingest(&path, "blank")
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::Extract(_)));
    }

    #[tokio::test]
    async fn repeated_ingestion_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "Just one chunk.").unwrap();

        let index = Arc::new(InMemoryIndex::new());
        let p = pipeline(Arc::new(LengthEmbedder), index.clone());
        p.ingest(&path, "notes").await.unwrap();
        p.ingest(&path, "notes").await.unwrap();
        assert_eq!(index.chunk_count("notes"), 2);
    }
}
