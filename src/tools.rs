//! Tools exposed to the task orchestrator.
//!
//! Every tool implements [`Tool`]: a name, a description the agent plans
//! from, a JSON Schema for its parameters, and an async `execute`.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolSession                  │
//! │  BudgetGuard (this session only)             │
//! │  ┌────────────────┐  ┌─────────────────────┐ │
//! │  │ GuardedTool    │  │ plain tools         │ │
//! │  │ retrieval_tool │  │ list_collections    │ │
//! │  │ web_search     │  │ ingest / memory     │ │
//! │  └────────────────┘  │ anki deck + cards   │ │
//! │                      └─────────────────────┘ │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Text-producing tools return a JSON string. Flashcard tools return
//! `{ "success": bool, ... }` objects and put store failures in `error`
//! instead of failing the call.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use crate::collection::derive_collection_key;
use crate::context::AppContext;
use crate::extract::extension_of;
use crate::flashcards::{AddCardOutcome, CardDraft};
use crate::guard::{guardrail_note, BudgetGuard, GuardKind, Guarded};
use crate::memory::UpdateMode;
use crate::models::ScoredChunk;
use crate::web_search::render_results;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the agent calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the accepted parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value>;
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    str_param(params, key).ok_or_else(|| anyhow::anyhow!("{} must not be empty", key))
}

// ============ Retrieval ============

pub struct RetrievalTool;

/// Agent-facing rendering of retrieval results.
pub fn render_chunks(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return "No relevant chunks found.  Try rephrasing your query, or use \
                ``list_collections_tool`` to check you're searching the right collection."
            .to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("**Chunk {}:**\n{}", i + 1, c.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        "retrieval_tool"
    }

    fn description(&self) -> &str {
        "Search ingested lecture notes for content relevant to the query. \
         Prefer this over web search. Be specific, and rephrase if results are thin. \
         Leave `collection` empty to search the default collection; \
         call list_collections_tool to see what exists."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language search query" },
                "collection": { "type": "string", "description": "Collection to search" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let collection = str_param(&params, "collection");
        let chunks = ctx.retrieval.retrieve(query, collection).await?;
        Ok(Value::String(render_chunks(&chunks)))
    }
}

pub struct ListCollectionsTool;

#[async_trait]
impl Tool for ListCollectionsTool {
    fn name(&self) -> &str {
        "list_collections_tool"
    }

    fn description(&self) -> &str {
        "List every collection in the vector index. Use before retrieval when unsure \
         which collection holds the content, or to check a PDF was ingested."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &AppContext) -> Result<Value> {
        let collections = ctx.index.list_collections().await?;
        if collections.is_empty() {
            return Ok(Value::String(
                "No collections exist yet. Ingest a PDF first with ``ingest_pdf_tool``.".to_string(),
            ));
        }
        let lines: Vec<String> = collections.iter().map(|c| format!("  • {}", c)).collect();
        Ok(Value::String(format!(
            "Available collections:\n{}",
            lines.join("\n")
        )))
    }
}

// ============ Ingestion ============

pub struct IngestPdfTool;

#[async_trait]
impl Tool for IngestPdfTool {
    fn name(&self) -> &str {
        "ingest_pdf_tool"
    }

    fn description(&self) -> &str {
        "Ingest a PDF into the vector index so its content becomes searchable. \
         Ingesting the same PDF twice creates duplicate chunks, so check \
         list_collections_tool first. When `collection` is omitted it is derived \
         from the filename (Linear_Algebra_Notes.pdf becomes linear_algebra_notes)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pdf_file_path": { "type": "string", "description": "Absolute path to the PDF" },
                "collection": { "type": "string", "description": "Target collection" }
            },
            "required": ["pdf_file_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let raw_path = required_str(&params, "pdf_file_path")?;
        let path = Path::new(raw_path);
        if !path.exists() {
            return Ok(Value::String(format!("❌ File not found: {}", raw_path)));
        }
        let extension = extension_of(path).unwrap_or_default();
        if extension != "pdf" {
            return Ok(Value::String(format!("❌ Not a PDF: .{}", extension)));
        }

        let collection = str_param(&params, "collection")
            .map(str::to_string)
            .unwrap_or_else(|| derive_collection_key(raw_path));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let text = match ctx.ingestor.ingest(path, &collection).await {
            Ok(count) => format!(
                "✅ Ingested '{}' into collection '{}' ({} chunks).\n\
                 You can now search it with retrieval_tool(query, collection='{}').",
                name, collection, count, collection
            ),
            Err(e) => format!("❌ Ingestion failed: {}", e),
        };
        Ok(Value::String(text))
    }
}

// ============ Web search ============

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Use only after retrieval_tool has come back thin twice, \
         or when the user asks for outside information."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer", "default": 1 },
                "topic": { "type": "string", "enum": ["general", "news", "finance"], "default": "general" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let max_results = params
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(ctx.config.web_search.max_results)
            .max(1);
        let topic = match str_param(&params, "topic") {
            Some(t @ ("general" | "news" | "finance")) => t,
            Some(other) => anyhow::bail!("unknown topic '{}'", other),
            None => "general",
        };

        let results = ctx.web_search.search(query, max_results, topic).await?;
        Ok(Value::String(render_results(query, &results)))
    }
}

// ============ Memory ============

pub struct UpdateMemoryTool;

#[async_trait]
impl Tool for UpdateMemoryTool {
    fn name(&self) -> &str {
        "update_memory"
    }

    fn description(&self) -> &str {
        "Update the persistent memory file at the end of every task. `section` is one of \
         User Profile, Subjects & Collections, Anki Decks, Recent Activity, User Preferences. \
         Recent Activity lines use the form `- [YYYY-MM-DD] action: description`."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "section": { "type": "string" },
                "content": { "type": "string" },
                "mode": { "type": "string", "enum": ["append", "replace"], "default": "append" }
            },
            "required": ["section", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let section = required_str(&params, "section")?;
        let content = required_str(&params, "content")?;
        let mode: UpdateMode = str_param(&params, "mode").unwrap_or("append").parse()?;

        let text = match ctx.memory.update(section, mode, content).await {
            Ok(()) => format!("✅ Memory updated: '{}' ({})", section, mode),
            Err(crate::error::StudyError::InvalidInput(msg)) => format!("❌ {}", msg),
            Err(e) => return Err(e.into()),
        };
        Ok(Value::String(text))
    }
}

// ============ Flashcards ============

fn store_error(e: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": e.to_string() })
}

pub struct ListDecksTool;

#[async_trait]
impl Tool for ListDecksTool {
    fn name(&self) -> &str {
        "list_decks"
    }

    fn description(&self) -> &str {
        "List all Anki deck names, including 'Parent::Child' subdecks."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &AppContext) -> Result<Value> {
        Ok(match ctx.flashcards.deck_names().await {
            Ok(decks) => json!(decks),
            Err(e) => store_error(e),
        })
    }
}

pub struct CreateDeckTool;

#[async_trait]
impl Tool for CreateDeckTool {
    fn name(&self) -> &str {
        "create_deck"
    }

    fn description(&self) -> &str {
        "Create an Anki deck. Use '::' for hierarchy (e.g. 'Linear Algebra::Eigenvalues'). \
         Call list_decks first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let name = required_str(&params, "name")?;
        Ok(match ctx.flashcards.create_deck(name).await {
            Ok(()) => json!({ "success": true, "message": format!("Deck '{}' created.", name) }),
            Err(e) => store_error(e),
        })
    }
}

pub struct ListCardsTool;

#[async_trait]
impl Tool for ListCardsTool {
    fn name(&self) -> &str {
        "list_cards"
    }

    fn description(&self) -> &str {
        "List the front, back, and note ID of every card in a deck. Use it for gap \
         analysis before generating new cards."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "deck_name": { "type": "string" } },
            "required": ["deck_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let deck = required_str(&params, "deck_name")?;
        Ok(match ctx.flashcards.list_cards(deck).await {
            Ok(cards) => serde_json::to_value(cards)?,
            Err(e) => store_error(e),
        })
    }
}

pub struct AddCardTool;

#[async_trait]
impl Tool for AddCardTool {
    fn name(&self) -> &str {
        "add_card"
    }

    fn description(&self) -> &str {
        "Add one flashcard to an EXISTING deck (call create_deck first). Exact duplicates \
         are skipped and reported with `skipped: true`."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "deck": { "type": "string" },
                "front": { "type": "string" },
                "back": { "type": "string" }
            },
            "required": ["deck", "front", "back"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let deck = required_str(&params, "deck")?;
        let front = required_str(&params, "front")?;
        let back = required_str(&params, "back")?;
        Ok(match ctx.flashcards.add_card(deck, front, back).await {
            Ok(AddCardOutcome::Added { note_id }) => json!({ "success": true, "note_id": note_id }),
            Ok(AddCardOutcome::Duplicate) => {
                json!({ "success": false, "skipped": true, "reason": "duplicate" })
            }
            Err(e) => store_error(e),
        })
    }
}

pub struct AddCardsTool;

#[async_trait]
impl Tool for AddCardsTool {
    fn name(&self) -> &str {
        "add_cards"
    }

    fn description(&self) -> &str {
        "Add a batch of question/answer cards under a '<parent_deck>::<topic>' subdeck, \
         creating it if needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string" },
                "cards": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "front": { "type": "string" }, "back": { "type": "string" } },
                        "required": ["front", "back"]
                    }
                },
                "parent_deck": { "type": "string" }
            },
            "required": ["topic", "cards"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let topic = required_str(&params, "topic")?;
        let parent = str_param(&params, "parent_deck").unwrap_or(&ctx.config.flashcards.parent_deck);
        let cards: Vec<CardDraft> = match params.get("cards") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|_| anyhow::anyhow!("each card needs 'front' and 'back'"))?,
            None => Vec::new(),
        };
        if cards.is_empty() {
            return Ok(json!({ "success": false, "error": "No cards provided. Nothing was added." }));
        }

        Ok(match ctx.flashcards.add_cards(parent, topic, &cards).await {
            Ok(report) => {
                let mut value = serde_json::to_value(&report)?;
                value["success"] = json!(report.failed.is_empty());
                value
            }
            Err(e) => store_error(e),
        })
    }
}

// ============ Budget-guarded wrapper ============

/// Wraps a tool so each call draws from a session's budget.
pub struct GuardedTool {
    inner: Box<dyn Tool>,
    kind: GuardKind,
    guard: Arc<BudgetGuard>,
    description: String,
}

impl GuardedTool {
    pub fn new(inner: Box<dyn Tool>, kind: GuardKind, guard: Arc<BudgetGuard>) -> Self {
        let description = format!("{}{}", inner.description(), guardrail_note(guard.limit(kind)));
        Self {
            inner,
            kind,
            guard,
            description,
        }
    }
}

#[async_trait]
impl Tool for GuardedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.inner.parameters_schema()
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let outcome = self
            .guard
            .guard(self.kind, || self.inner.execute(params, ctx))
            .await?;
        Ok(match outcome {
            Guarded::Allowed(value) => value,
            Guarded::Refused(message) => Value::String(message),
        })
    }
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Every built-in tool, unguarded.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RetrievalTool));
        registry.register(Box::new(ListCollectionsTool));
        registry.register(Box::new(IngestPdfTool));
        registry.register(Box::new(WebSearchTool));
        registry.register(Box::new(UpdateMemoryTool));
        registry.register(Box::new(ListDecksTool));
        registry.register(Box::new(CreateDeckTool));
        registry.register(Box::new(ListCardsTool));
        registry.register(Box::new(AddCardTool));
        registry.register(Box::new(AddCardsTool));
        registry
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Name, description, and schema of every tool.
    pub fn describe(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Session ============

/// The tool set of one conversation, with its own budget guard.
pub struct ToolSession {
    id: String,
    guard: Arc<BudgetGuard>,
    registry: ToolRegistry,
    ctx: Arc<AppContext>,
}

impl ToolSession {
    pub fn new(ctx: Arc<AppContext>, id: impl Into<String>) -> Self {
        let limits = &ctx.config.limits;
        let guard = Arc::new(BudgetGuard::new(
            limits.max_retrieval_calls,
            limits.max_web_searches,
        ));

        let mut registry = ToolRegistry::with_builtins();
        registry.register(Box::new(GuardedTool::new(
            Box::new(RetrievalTool),
            GuardKind::Retrieval,
            guard.clone(),
        )));
        registry.register(Box::new(GuardedTool::new(
            Box::new(WebSearchTool),
            GuardKind::WebSearch,
            guard.clone(),
        )));

        Self {
            id: id.into(),
            guard,
            registry,
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start a new user turn: both budgets are full again.
    pub fn begin_turn(&self) {
        self.guard.reset_for_new_turn();
    }

    pub fn guard(&self) -> &BudgetGuard {
        &self.guard
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn call(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self
            .registry
            .find(name)
            .ok_or_else(|| anyhow::anyhow!("unknown tool: {}", name))?;
        tool.execute(params, &self.ctx).await
    }
}
