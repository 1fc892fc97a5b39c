//! Task envelopes: provenance records for each execution within a run.
//!
//! An envelope is created when a node is about to execute, moves
//! `submitted -> working` on dispatch, and settles exactly once as
//! `completed` or `failed` when the worker call returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::graph::INPUT;
use crate::error::{Error, Result};
use crate::orchestration::worker::WorkerResponse;

/// Unique identifier for one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier shared by every envelope of one top-level run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Submitted,
    Working,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Submitted => write!(f, "submitted"),
            TaskState::Working => write!(f, "working"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of work flowing along an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub context_id: ContextId,
    /// Envelopes that fed this one.
    pub parent_task_ids: Vec<TaskId>,
    pub task: String,
    /// Context actually handed to the worker.
    pub context: String,
    pub state: TaskState,
    pub node_id: String,
    pub result: Option<WorkerResponse>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskEnvelope {
    /// Create a submitted envelope for `node_id`.
    pub fn new(context_id: ContextId, node_id: &str, task: &str, parents: Vec<TaskId>) -> Self {
        Self {
            task_id: TaskId::new(),
            context_id,
            parent_task_ids: parents,
            task: task.to_string(),
            context: String::new(),
            state: TaskState::Submitted,
            node_id: node_id.to_string(),
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// The virtual envelope standing for the run's input.
    pub fn input(context_id: ContextId, task: &str) -> Self {
        let mut envelope = Self::new(context_id, INPUT, task, Vec::new());
        envelope.state = TaskState::Completed;
        envelope.completed_at = Some(envelope.created_at);
        envelope
    }

    /// Set the context given to the worker.
    pub fn with_context(mut self, context: String) -> Self {
        self.context = context;
        self
    }

    /// Dispatch: `submitted -> working`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskState::Submitted, TaskState::Working)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Settle a working envelope from the worker's response.
    pub fn finish(&mut self, response: WorkerResponse) -> Result<()> {
        let to = if response.is_success() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        self.transition(TaskState::Working, to)?;
        self.result = Some(response);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Settle a working envelope successfully.
    pub fn complete(&mut self, output: &str) -> Result<()> {
        self.finish(WorkerResponse::success(output))
    }

    /// Settle a working envelope as failed.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.finish(WorkerResponse::failure(error))
    }

    fn transition(&mut self, from: TaskState, to: TaskState) -> Result<()> {
        if self.state != from {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }

    /// Worker output, only for completed envelopes.
    pub fn output(&self) -> Option<&str> {
        if !self.is_completed() {
            return None;
        }
        self.result.as_ref().map(|r| r.output.as_str())
    }

    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }
}
