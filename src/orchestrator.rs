//! Boundary to the external task orchestrator (the LLM-driven agent loop).
//!
//! The orchestrator is reached through the [`Orchestrator`] trait. A run
//! either completes with a summary or stops on an interrupt listing actions
//! that need approval. [`run_to_completion`] drives a run to the end,
//! asking an [`ApprovalPolicy`] for decisions at every interrupt:
//!
//! - [`AlwaysApprove`] approves everything (unattended ambient runs).
//! - [`PromptHuman`] parks the interrupt until decisions arrive from the
//!   web layer via [`PromptHuman::respond`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::error::{StudyError, StudyResult};

/// An approval-gated action the orchestrator wants to take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub action_name: String,
    #[serde(default)]
    pub allowed_decisions: Vec<String>,
}

/// Pending approvals reported by an interrupted run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptPayload {
    #[serde(default)]
    pub action_requests: Vec<ActionRequest>,
    #[serde(default)]
    pub review_configs: Vec<ReviewConfig>,
}

/// Resolution of one action request, serialised as `{"type": "approve"}` etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Edit {
        edited_action: Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { summary: String },
    Interrupted(InterruptPayload),
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Start (or continue) `thread_id` with a user message.
    async fn invoke(&self, thread_id: &str, message: &str) -> StudyResult<RunOutcome>;

    /// Resume an interrupted thread with one decision per action request.
    async fn resume(&self, thread_id: &str, decisions: Vec<Decision>) -> StudyResult<RunOutcome>;
}

#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    async fn decide(&self, thread_id: &str, payload: &InterruptPayload) -> StudyResult<Vec<Decision>>;
}

/// Approves every pending action without asking.
pub struct AlwaysApprove;

#[async_trait]
impl ApprovalPolicy for AlwaysApprove {
    async fn decide(&self, _thread_id: &str, payload: &InterruptPayload) -> StudyResult<Vec<Decision>> {
        Ok(vec![Decision::Approve; payload.action_requests.len()])
    }
}

struct Parked {
    payload: InterruptPayload,
    reply: oneshot::Sender<Vec<Decision>>,
}

/// Holds interrupts until a human answers them.
#[derive(Default)]
pub struct PromptHuman {
    parked: Mutex<HashMap<String, Parked>>,
}

impl PromptHuman {
    pub fn new() -> Self {
        Self::default()
    }

    /// The interrupt waiting on `thread_id`, if any.
    pub fn pending(&self, thread_id: &str) -> Option<InterruptPayload> {
        self.parked
            .lock()
            .ok()?
            .get(thread_id)
            .map(|p| p.payload.clone())
    }

    /// Every waiting interrupt, keyed by thread.
    pub fn pending_all(&self) -> Vec<(String, InterruptPayload)> {
        let Ok(parked) = self.parked.lock() else {
            return Vec::new();
        };
        let mut all: Vec<_> = parked
            .iter()
            .map(|(id, p)| (id.clone(), p.payload.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Deliver decisions for `thread_id`. Fails when nothing is waiting.
    pub fn respond(&self, thread_id: &str, decisions: Vec<Decision>) -> StudyResult<()> {
        let parked = self
            .parked
            .lock()
            .map_err(|_| StudyError::Orchestrator("approval lock poisoned".to_string()))?
            .remove(thread_id)
            .ok_or_else(|| {
                StudyError::InvalidInput(format!("no pending interrupt for '{}'", thread_id))
            })?;
        parked
            .reply
            .send(decisions)
            .map_err(|_| StudyError::Orchestrator(format!("run '{}' is no longer waiting", thread_id)))
    }
}

#[async_trait]
impl ApprovalPolicy for PromptHuman {
    async fn decide(&self, thread_id: &str, payload: &InterruptPayload) -> StudyResult<Vec<Decision>> {
        let (tx, rx) = oneshot::channel();
        self.parked
            .lock()
            .map_err(|_| StudyError::Orchestrator("approval lock poisoned".to_string()))?
            .insert(
                thread_id.to_string(),
                Parked {
                    payload: payload.clone(),
                    reply: tx,
                },
            );
        info!(thread = %thread_id, actions = payload.action_requests.len(), "waiting for approval");
        rx.await
            .map_err(|_| StudyError::Orchestrator("approval request abandoned".to_string()))
    }
}

/// Invoke, then resolve interrupts until the run completes.
///
/// Gives up with [`StudyError::Orchestrator`] after `max_rounds`
/// interrupts.
pub async fn run_to_completion(
    orchestrator: &dyn Orchestrator,
    policy: &dyn ApprovalPolicy,
    thread_id: &str,
    message: &str,
    max_rounds: usize,
) -> StudyResult<String> {
    let mut outcome = orchestrator.invoke(thread_id, message).await?;
    let mut rounds = 0usize;

    loop {
        match outcome {
            RunOutcome::Completed { summary } => return Ok(summary),
            RunOutcome::Interrupted(payload) => {
                if rounds >= max_rounds {
                    return Err(StudyError::Orchestrator(format!(
                        "thread '{}' still interrupted after {} approval rounds",
                        thread_id, rounds
                    )));
                }
                rounds += 1;
                let decisions = policy.decide(thread_id, &payload).await?;
                debug!(thread = %thread_id, round = rounds, "resuming");
                outcome = orchestrator.resume(thread_id, decisions).await?;
            }
        }
    }
}

/// Fresh thread identifier: `<prefix>-<8 hex chars>`.
pub fn new_thread_id(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}

// ============ Disabled ============

pub struct DisabledOrchestrator;

#[async_trait]
impl Orchestrator for DisabledOrchestrator {
    async fn invoke(&self, _thread_id: &str, _message: &str) -> StudyResult<RunOutcome> {
        Err(StudyError::Orchestrator(
            "no orchestrator configured (set orchestrator.url)".to_string(),
        ))
    }

    async fn resume(&self, _thread_id: &str, _decisions: Vec<Decision>) -> StudyResult<RunOutcome> {
        Err(StudyError::Orchestrator(
            "no orchestrator configured (set orchestrator.url)".to_string(),
        ))
    }
}

// ============ HTTP ============

/// JSON client for an agent runtime.
///
/// - `POST {url}/threads/{id}/runs` with `{"message": ...}`
/// - `POST {url}/threads/{id}/resume` with `{"decisions": [...]}`
///
/// Both answer `{"status": "completed", "summary": ...}` or
/// `{"status": "interrupted", "interrupt": {action_requests, review_configs}}`.
pub struct HttpOrchestrator {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RunResponse {
    status: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    interrupt: Option<InterruptPayload>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpOrchestrator {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> StudyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StudyError::Orchestrator(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, body: Value) -> StudyResult<RunOutcome> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| StudyError::Orchestrator(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StudyError::Orchestrator(format!("HTTP {}: {}", status, text)));
        }

        let run: RunResponse = response
            .json()
            .await
            .map_err(|e| StudyError::Orchestrator(format!("invalid run response: {}", e)))?;

        match run.status.as_str() {
            "completed" => Ok(RunOutcome::Completed {
                summary: run.summary.unwrap_or_default(),
            }),
            "interrupted" => Ok(RunOutcome::Interrupted(run.interrupt.unwrap_or_default())),
            "failed" => Err(StudyError::Orchestrator(
                run.error.unwrap_or_else(|| "run failed".to_string()),
            )),
            other => Err(StudyError::Orchestrator(format!("unknown run status '{}'", other))),
        }
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn invoke(&self, thread_id: &str, message: &str) -> StudyResult<RunOutcome> {
        self.post(
            &format!("/threads/{}/runs", thread_id),
            serde_json::json!({ "message": message }),
        )
        .await
    }

    async fn resume(&self, thread_id: &str, decisions: Vec<Decision>) -> StudyResult<RunOutcome> {
        self.post(
            &format!("/threads/{}/resume", thread_id),
            serde_json::json!({ "decisions": decisions }),
        )
        .await
    }
}

pub fn create_orchestrator(
    config: &OrchestratorConfig,
) -> StudyResult<std::sync::Arc<dyn Orchestrator>> {
    match &config.url {
        Some(url) => Ok(std::sync::Arc::new(HttpOrchestrator::new(
            url.clone(),
            config.timeout_secs,
        )?)),
        None => Ok(std::sync::Arc::new(DisabledOrchestrator)),
    }
}
