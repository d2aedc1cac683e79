//! Orchestrator runs submitted over HTTP, tracked as tasks.
//!
//! Each task owns one orchestrator thread (the task id doubles as the
//! thread id). Runs execute on background tasks; interrupts wait in a
//! shared [`PromptHuman`] until someone answers them through
//! [`TaskManager::respond`]. State is kept in memory only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{StudyError, StudyResult};
use crate::orchestrator::{
    new_thread_id, run_to_completion, Decision, InterruptPayload, Orchestrator, PromptHuman,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub message: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type TaskTable = Arc<RwLock<HashMap<String, TaskRecord>>>;

pub struct TaskManager {
    orchestrator: Arc<dyn Orchestrator>,
    approvals: Arc<PromptHuman>,
    max_rounds: usize,
    tasks: TaskTable,
}

impl TaskManager {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, max_rounds: usize) -> Self {
        Self {
            orchestrator,
            approvals: Arc::new(PromptHuman::new()),
            max_rounds,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a task and start its run in the background.
    pub async fn create(&self, message: impl Into<String>) -> TaskRecord {
        let now = Utc::now();
        let record = TaskRecord {
            id: new_thread_id("task"),
            message: message.into(),
            status: TaskStatus::Pending,
            summary: None,
            error: None,
            interrupt: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        info!(task = %record.id, "task created");
        self.spawn_run(record.id.clone(), record.message.clone());
        record
    }

    fn spawn_run(&self, id: String, message: String) {
        let orchestrator = self.orchestrator.clone();
        let approvals = self.approvals.clone();
        let tasks = self.tasks.clone();
        let max_rounds = self.max_rounds;

        tokio::spawn(async move {
            set_status(&tasks, &id, TaskStatus::Running).await;
            let result = run_to_completion(
                orchestrator.as_ref(),
                approvals.as_ref(),
                &id,
                &message,
                max_rounds,
            )
            .await;

            let mut table = tasks.write().await;
            let Some(record) = table.get_mut(&id) else {
                return;
            };
            record.updated_at = Utc::now();
            match result {
                Ok(summary) => {
                    record.status = TaskStatus::Completed;
                    record.summary = Some(summary);
                    record.error = None;
                }
                Err(e) => {
                    warn!(task = %id, error = %e, "task failed");
                    record.status = TaskStatus::Failed;
                    record.error = Some(e.to_string());
                }
            }
        });
    }

    /// Snapshot of one task. A running task with a parked interrupt reports
    /// `awaiting_approval` along with the payload.
    pub async fn get(&self, id: &str) -> Option<TaskRecord> {
        let record = self.tasks.read().await.get(id).cloned()?;
        Some(self.with_interrupt(record))
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<TaskRecord> {
        let mut all: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .cloned()
            .map(|r| self.with_interrupt(r))
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Tasks currently waiting on a human decision.
    pub async fn pending(&self) -> Vec<TaskRecord> {
        self.list()
            .await
            .into_iter()
            .filter(|r| r.status == TaskStatus::AwaitingApproval)
            .collect()
    }

    fn with_interrupt(&self, mut record: TaskRecord) -> TaskRecord {
        if record.status == TaskStatus::Running {
            if let Some(payload) = self.approvals.pending(&record.id) {
                record.status = TaskStatus::AwaitingApproval;
                record.interrupt = Some(payload);
            }
        }
        record
    }

    /// Answer the interrupt a task is waiting on.
    pub fn respond(&self, id: &str, decisions: Vec<Decision>) -> StudyResult<()> {
        self.approvals.respond(id, decisions)
    }

    /// Continue a finished task's thread with another message.
    pub async fn follow_up(&self, id: &str, message: impl Into<String>) -> StudyResult<TaskRecord> {
        let message = message.into();
        let snapshot = {
            let mut table = self.tasks.write().await;
            let record = table
                .get_mut(id)
                .ok_or_else(|| StudyError::InvalidInput(format!("unknown task '{}'", id)))?;
            if !record.status.is_finished() {
                return Err(StudyError::InvalidInput(format!(
                    "task '{}' is still running",
                    id
                )));
            }
            record.status = TaskStatus::Pending;
            record.message = message.clone();
            record.summary = None;
            record.error = None;
            record.updated_at = Utc::now();
            record.clone()
        };
        self.spawn_run(id.to_string(), message);
        Ok(snapshot)
    }
}

async fn set_status(tasks: &TaskTable, id: &str, status: TaskStatus) {
    if let Some(record) = tasks.write().await.get_mut(id) {
        record.status = status;
        record.updated_at = Utc::now();
    }
}
