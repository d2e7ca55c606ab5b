//! Execution record types.
//!
//! A `WorkflowExecution` is one run of a workflow; each step dispatched during
//! the run gets a `WorkflowExecutionStep`. Both are persisted through the
//! repository ports in owlflow-core and updated as the run progresses.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::workflow::{Step, StepType};

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    /// Reserved for runs suspended on an external signal.
    Waiting,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Canceled => "canceled",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Canceled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Canceled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Execution error
// ---------------------------------------------------------------------------

/// Structured error attached to a failed execution or step record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ExecutionError {
    pub const STEP_FAILED: &'static str = "STEP_FAILED";
    pub const WORKFLOW_FAILED: &'static str = "WORKFLOW_FAILED";
    pub const UNEXPECTED_ERROR: &'static str = "UNEXPECTED_ERROR";

    /// Error recorded on a step whose final attempt failed.
    pub fn step_failed(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Self::STEP_FAILED.to_string(),
            message: message.into(),
            step_id: Some(step_id.into()),
            details: None,
        }
    }

    /// Error recorded on the execution when a step failure aborts the run.
    pub fn workflow_failed(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Self::WORKFLOW_FAILED.to_string(),
            message: message.into(),
            step_id: Some(step_id.into()),
            details: None,
        }
    }

    /// Error recorded when the run aborts for a reason outside step execution.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            code: Self::UNEXPECTED_ERROR.to_string(),
            message: message.into(),
            step_id: None,
            details: None,
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// One run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 assigned when the run is accepted.
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub status: ExecutionStatus,
    /// Free-form label of what started the run (`manual`, `webhook`, ...).
    pub trigger_type: String,
    pub input: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// `{"variables": {...}, "step_outputs": {...}}` once the run completes.
    pub state_snapshot: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A freshly accepted, pending run.
    pub fn new(
        workflow_id: Uuid,
        user_id: impl Into<String>,
        trigger_type: impl Into<String>,
        input: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            user_id: user_id.into(),
            status: ExecutionStatus::Pending,
            trigger_type: trigger_type.into(),
            input,
            output: None,
            error: None,
            state_snapshot: json!({}),
            current_step_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to a terminal status, stamping `completed_at` only once.
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// The record of one step dispatched during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionStep {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub step_type: StepType,
    pub status: StepStatus,
    /// `{"type": ..., "config": ...}` as declared.
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Number of retries performed (not counting the first attempt).
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecutionStep {
    /// A running record for `step`, created just before it is dispatched.
    pub fn start(execution_id: Uuid, step: &Step) -> Self {
        Self {
            id: Uuid::now_v7(),
            execution_id,
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            step_type: step.step_type(),
            status: StepStatus::Running,
            input: json!({
                "type": step.step_type().as_str(),
                "config": step.config.to_value(),
            }),
            output: None,
            error: None,
            retry_count: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to a terminal status, stamping `completed_at` only once.
    pub fn finish(&mut self, status: StepStatus) {
        self.status = status;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}
