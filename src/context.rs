//! Process-wide dependencies, built once at startup and passed down.
//!
//! Nothing in the crate keeps module-level state: the retriever cache,
//! memory store, and collaborator clients all hang off an [`AppContext`].
//! Tests build isolated contexts with [`AppContextBuilder`] and swap in
//! stub collaborators.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::event_log::EventLog;
use crate::flashcards::AnkiClient;
use crate::index::{SimilarityIndex, SqliteIndex};
use crate::ingest::{DocumentIngestor, IngestionPipeline};
use crate::manifest::ManifestStore;
use crate::memory::MemoryStore;
use crate::orchestrator::{create_orchestrator, Orchestrator};
use crate::retrieve::RetrievalFacade;
use crate::web_search::{create_web_search, WebSearch};

pub struct AppContext {
    pub config: Arc<Config>,
    pub index: Arc<dyn SimilarityIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub ingestor: Arc<dyn DocumentIngestor>,
    pub retrieval: RetrievalFacade,
    pub memory: MemoryStore,
    pub flashcards: AnkiClient,
    pub web_search: Arc<dyn WebSearch>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub manifest: ManifestStore,
    pub event_log: EventLog,
}

impl AppContext {
    /// Context with every collaborator taken from `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        AppContextBuilder::new(config).build().await
    }
}

/// Overrides for individual collaborators; anything not set is built
/// from the config.
pub struct AppContextBuilder {
    config: Config,
    index: Option<Arc<dyn SimilarityIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    ingestor: Option<Arc<dyn DocumentIngestor>>,
    web_search: Option<Arc<dyn WebSearch>>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
}

impl AppContextBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            index: None,
            embedder: None,
            ingestor: None,
            web_search: None,
            orchestrator: None,
        }
    }

    pub fn index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn ingestor(mut self, ingestor: Arc<dyn DocumentIngestor>) -> Self {
        self.ingestor = Some(ingestor);
        self
    }

    pub fn web_search(mut self, web_search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(web_search);
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub async fn build(self) -> Result<AppContext> {
        let config = self.config;

        let index: Arc<dyn SimilarityIndex> = match self.index {
            Some(index) => index,
            None => Arc::new(SqliteIndex::open(&config.db.path).await?),
        };
        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => create_embedder(&config.embedding)?,
        };
        let ingestor: Arc<dyn DocumentIngestor> = match self.ingestor {
            Some(ingestor) => ingestor,
            None => Arc::new(IngestionPipeline::new(
                &config.chunking,
                embedder.clone(),
                index.clone(),
            )),
        };
        let web_search = match self.web_search {
            Some(web_search) => web_search,
            None => create_web_search(&config.web_search)?,
        };
        let orchestrator = match self.orchestrator {
            Some(orchestrator) => orchestrator,
            None => create_orchestrator(&config.orchestrator)?,
        };

        let retrieval = RetrievalFacade::new(&config.retrieval, index.clone(), embedder.clone());
        let memory = MemoryStore::new(&config.memory.path, config.memory.recent_activity_cap);
        let flashcards = AnkiClient::new(&config.flashcards)?;
        let manifest = ManifestStore::new(&config.ambient.manifest_file);
        let event_log = EventLog::new(&config.ambient.log_file);

        Ok(AppContext {
            config: Arc::new(config),
            index,
            embedder,
            ingestor,
            retrieval,
            memory,
            flashcards,
            web_search,
            orchestrator,
            manifest,
            event_log,
        })
    }
}
