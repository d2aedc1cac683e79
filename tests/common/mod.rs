//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use study_harness::config::Config;
use study_harness::context::{AppContext, AppContextBuilder};
use study_harness::embedding::Embedder;
use study_harness::error::{StudyError, StudyResult};
use study_harness::index::InMemoryIndex;
use study_harness::ingest::DocumentIngestor;
use study_harness::orchestrator::{Decision, Orchestrator, RunOutcome};

pub const DIMS: usize = 32;

/// Bag-of-words hashing embedder: texts sharing words score higher.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> StudyResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
            % DIMS;
        v[bucket] += 1.0;
    }
    v
}

/// Records every ingest call; fails for file names listed in `failing`.
#[derive(Default)]
pub struct StubIngestor {
    pub failing: HashSet<String>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl StubIngestor {
    pub fn failing_on(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentIngestor for StubIngestor {
    async fn ingest(&self, path: &Path, collection: &str) -> StudyResult<usize> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((name.clone(), collection.to_string()));
        if self.failing.contains(&name) {
            return Err(StudyError::Extract(format!("{} is corrupt", name)));
        }
        Ok(3)
    }
}

/// Completes every run; fails runs whose message mentions a listed name.
#[derive(Default)]
pub struct StubOrchestrator {
    pub failing: HashSet<String>,
    pub messages: Mutex<Vec<(String, String)>>,
}

impl StubOrchestrator {
    pub fn failing_on(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Orchestrator for StubOrchestrator {
    async fn invoke(&self, thread_id: &str, message: &str) -> StudyResult<RunOutcome> {
        self.messages
            .lock()
            .unwrap()
            .push((thread_id.to_string(), message.to_string()));
        if self.failing.iter().any(|n| message.contains(n.as_str())) {
            return Err(StudyError::Orchestrator("model request timed out".into()));
        }
        Ok(RunOutcome::Completed {
            summary: "flashcards and guide created".into(),
        })
    }

    async fn resume(&self, _thread_id: &str, _decisions: Vec<Decision>) -> StudyResult<RunOutcome> {
        Ok(RunOutcome::Completed {
            summary: "resumed".into(),
        })
    }
}

pub struct Workspace {
    pub tmp: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path());
        std::fs::create_dir_all(&config.ambient.watch_directory).unwrap();
        Self { tmp, config }
    }

    pub fn watch_dir(&self) -> PathBuf {
        self.config.ambient.watch_directory.clone()
    }

    pub fn drop_pdf(&self, name: &str) -> PathBuf {
        let path = self.watch_dir().join(name);
        std::fs::write(&path, minimal_pdf("placeholder lecture text")).unwrap();
        path
    }

    pub fn builder(&self) -> AppContextBuilder {
        AppContextBuilder::new(self.config.clone())
            .index(Arc::new(InMemoryIndex::new()))
            .embedder(Arc::new(KeywordEmbedder))
    }

    pub async fn context(
        &self,
        ingestor: Arc<dyn DocumentIngestor>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Arc<AppContext> {
        Arc::new(
            self.builder()
                .ingestor(ingestor)
                .orchestrator(orchestrator)
                .build()
                .await
                .unwrap(),
        )
    }
}

/// Single-page PDF with one line of Helvetica text.
pub fn minimal_pdf(text: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", text);
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", stream.len(), stream),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}
