//! HTTP API over the study assistant.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/ambient/status` | Poller state, loop status, last cycle |
//! | `POST` | `/ambient/poll` | Run one cycle now (`409` if one is running) |
//! | `GET`  | `/ambient/log?limit=N` | Newest event-log records first |
//! | `GET`  | `/ambient/manifest` | Parsed manifest rows |
//! | `GET`  | `/collections` | Collection names |
//! | `GET`  | `/tools/list` | Tool names, descriptions, schemas |
//! | `POST` | `/sessions/{id}/turn` | Start a new turn (refill budgets) |
//! | `POST` | `/sessions/{id}/tools/{name}` | Call a tool within a session |
//! | `DELETE` | `/sessions/{id}` | Drop a session and its budgets |
//! | `POST` | `/tasks` | Submit a message to the orchestrator |
//! | `GET`  | `/tasks` | All tasks |
//! | `GET`  | `/tasks/pending` | Tasks awaiting approval |
//! | `GET`  | `/tasks/{id}` | One task |
//! | `POST` | `/tasks/{id}/interrupt` | Deliver decisions for a pending interrupt |
//! | `POST` | `/tasks/{id}/message` | Continue a finished task's thread |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `upstream_error` (502), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::ambient::{AmbientHandle, AmbientPoller};
use crate::context::AppContext;
use crate::error::StudyError;
use crate::orchestrator::Decision;
use crate::tasks::TaskManager;
use crate::tools::ToolSession;

const DEFAULT_LOG_LIMIT: usize = 50;

/// Shared state behind every route.
#[derive(Clone)]
pub struct ServerState {
    ctx: Arc<AppContext>,
    ambient: Arc<AmbientHandle>,
    tasks: Arc<TaskManager>,
    sessions: Arc<Mutex<HashMap<String, SessionSlot>>>,
    session_idle: Duration,
}

struct SessionSlot {
    session: Arc<ToolSession>,
    last_used: Instant,
}

impl ServerState {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let poller = Arc::new(AmbientPoller::new(ctx.clone()));
        let interval = Duration::from_secs(ctx.config.ambient.poll_interval_seconds);
        let tasks = TaskManager::new(
            ctx.orchestrator.clone(),
            ctx.config.orchestrator.max_interrupt_rounds,
        );
        Self {
            ambient: Arc::new(AmbientHandle::new(poller, interval)),
            tasks: Arc::new(tasks),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            session_idle: Duration::from_secs(ctx.config.server.session_idle_secs),
            ctx,
        }
    }

    pub fn ambient(&self) -> &Arc<AmbientHandle> {
        &self.ambient
    }

    /// Fetch or create a session, evicting any that have sat idle too long.
    async fn session(&self, id: &str) -> Arc<ToolSession> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, slot| now.duration_since(slot.last_used) < self.session_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "dropped idle sessions");
        }
        let slot = sessions.entry(id.to_string()).or_insert_with(|| SessionSlot {
            session: Arc::new(ToolSession::new(self.ctx.clone(), id)),
            last_used: now,
        });
        slot.last_used = now;
        slot.session.clone()
    }

    async fn remove_session(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ambient/status", get(handle_ambient_status))
        .route("/ambient/poll", post(handle_ambient_poll))
        .route("/ambient/log", get(handle_ambient_log))
        .route("/ambient/manifest", get(handle_ambient_manifest))
        .route("/collections", get(handle_collections))
        .route("/tools/list", get(handle_list_tools))
        .route("/sessions/{id}", delete(handle_delete_session))
        .route("/sessions/{id}/turn", post(handle_session_turn))
        .route("/sessions/{id}/tools/{name}", post(handle_session_tool))
        .route("/tasks", post(handle_create_task).get(handle_list_tasks))
        .route("/tasks/pending", get(handle_pending_tasks))
        .route("/tasks/{id}", get(handle_get_task))
        .route("/tasks/{id}/interrupt", post(handle_task_interrupt))
        .route("/tasks/{id}/message", post(handle_task_message))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C. Starts the ambient loop first when
/// `[ambient].enabled` is set, and stops it on the way out.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let state = ServerState::new(ctx.clone());

    if ctx.config.ambient.enabled {
        state.ambient().start();
    }
    let ambient = state.ambient().clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    ambient.stop().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<StudyError> for AppError {
    fn from(e: StudyError) -> Self {
        let message = e.to_string();
        match e {
            StudyError::NotFound(_) => not_found(message),
            StudyError::UnsupportedFormat(_)
            | StudyError::Extract(_)
            | StudyError::MissingCollection
            | StudyError::InvalidInput(_) => bad_request(message),
            StudyError::EmbeddingProvider(_)
            | StudyError::Orchestrator(_)
            | StudyError::FlashcardStore(_)
            | StudyError::WebSearch(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
            StudyError::Index(_) | StudyError::Persistence { .. } | StudyError::Serialization(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

/// Tool failures arrive as `anyhow`; recover the library error when there
/// is one, otherwise treat the message as a bad argument.
fn classify_tool_error(tool: &str, err: anyhow::Error) -> AppError {
    match err.downcast::<StudyError>() {
        Ok(study) => {
            let mut app = AppError::from(study);
            app.message = format!("{}: {}", tool, app.message);
            app
        }
        Err(other) => bad_request(format!("{}: {}", tool, other)),
    }
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Ambient ============

async fn handle_ambient_status(State(state): State<ServerState>) -> Json<Value> {
    let handle = &state.ambient;
    let poller = handle.poller();
    Json(json!({
        "enabled": state.ctx.config.ambient.enabled,
        "running": handle.running(),
        "busy": poller.is_busy(),
        "poller": poller.state(),
        "interval_seconds": handle.interval().as_secs(),
        "watch_dir": poller.watch_dir().display().to_string(),
        "last_summary": poller.last_summary(),
    }))
}

async fn handle_ambient_poll(State(state): State<ServerState>) -> Result<Json<Value>, AppError> {
    match state.ambient.poller().try_poll_once().await {
        None => Err(AppError::new(
            StatusCode::CONFLICT,
            "conflict",
            "a poll cycle is already running",
        )),
        Some(result) => {
            let summary = result?;
            Ok(Json(json!({ "summary": summary.headline(), "cycle": summary })))
        }
    }
}

#[derive(Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

async fn handle_ambient_log(
    State(state): State<ServerState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Value>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let events = state.ctx.event_log.read_recent(limit)?;
    Ok(Json(json!({ "events": events })))
}

async fn handle_ambient_manifest(
    State(state): State<ServerState>,
) -> Result<Json<Value>, AppError> {
    let entries = state.ctx.manifest.entries()?;
    Ok(Json(json!({ "entries": entries })))
}

// ============ Collections & tools ============

async fn handle_collections(State(state): State<ServerState>) -> Result<Json<Value>, AppError> {
    let collections = state.ctx.index.list_collections().await?;
    Ok(Json(json!({ "collections": collections })))
}

async fn handle_list_tools(State(state): State<ServerState>) -> Json<Value> {
    // A throwaway session shows the guarded descriptions agents will see.
    let session = ToolSession::new(state.ctx.clone(), "describe");
    Json(json!({ "tools": session.registry().describe() }))
}

// ============ Sessions ============

async fn handle_session_turn(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Json<Value> {
    let session = state.session(&id).await;
    session.begin_turn();
    Json(json!({ "session": session.id(), "turn_started": true }))
}

async fn handle_delete_session(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.remove_session(&id).await {
        return Err(not_found(format!("no session with id: {}", id)));
    }
    Ok(Json(json!({ "session": id, "deleted": true })))
}

async fn handle_session_tool(
    State(state): State<ServerState>,
    Path((id, name)): Path<(String, String)>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let session = state.session(&id).await;
    if session.registry().find(&name).is_none() {
        return Err(not_found(format!("no tool registered with name: {}", name)));
    }
    let result = session
        .call(&name, params)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;
    Ok(Json(json!({ "result": result })))
}

// ============ Tasks ============

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Deserialize)]
struct InterruptBody {
    decisions: Vec<Decision>,
}

async fn handle_create_task(
    State(state): State<ServerState>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if body.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let task = state.tasks.create(body.message).await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "task": task }))))
}

async fn handle_list_tasks(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({ "tasks": state.tasks.list().await }))
}

async fn handle_pending_tasks(State(state): State<ServerState>) -> Json<Value> {
    let pending = state.tasks.pending().await;
    Json(json!({ "count": pending.len(), "tasks": pending }))
}

async fn handle_get_task(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let task = state
        .tasks
        .get(&id)
        .await
        .ok_or_else(|| not_found(format!("no task with id: {}", id)))?;
    Ok(Json(json!({ "task": task })))
}

async fn handle_task_interrupt(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<InterruptBody>,
) -> Result<Json<Value>, AppError> {
    if state.tasks.get(&id).await.is_none() {
        return Err(not_found(format!("no task with id: {}", id)));
    }
    state.tasks.respond(&id, body.decisions)?;
    Ok(Json(json!({ "task": id, "resumed": true })))
}

async fn handle_task_message(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if body.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    if state.tasks.get(&id).await.is_none() {
        return Err(not_found(format!("no task with id: {}", id)));
    }
    let task = state.tasks.follow_up(&id, body.message).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "task": task }))))
}
