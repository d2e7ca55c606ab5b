//! Execution progress events.
//!
//! Published on the engine's `EventBus` as a run advances. Events are
//! informational; the durable execution records remain authoritative.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::ExecutionStatus;
use crate::workflow::StepType;

/// A progress event for a single execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        workflow_name: String,
    },
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_type: StepType,
    },
    /// Emitted before the backoff sleep preceding retry `attempt`.
    StepRetrying {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },
    StepSkipped {
        execution_id: Uuid,
        step_id: String,
        reason: String,
    },
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },
    RunFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::RunStarted { execution_id, .. }
            | ExecutionEvent::StepStarted { execution_id, .. }
            | ExecutionEvent::StepRetrying { execution_id, .. }
            | ExecutionEvent::StepCompleted { execution_id, .. }
            | ExecutionEvent::StepSkipped { execution_id, .. }
            | ExecutionEvent::StepFailed { execution_id, .. }
            | ExecutionEvent::RunFinished { execution_id, .. } => *execution_id,
        }
    }
}
