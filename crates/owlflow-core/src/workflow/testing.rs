//! In-test stores and capabilities shared by the engine and retry tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use owlflow_types::error::RepositoryError;
use owlflow_types::execution::{ExecutionStatus, WorkflowExecution, WorkflowExecutionStep};
use owlflow_types::tool::ToolCallResult;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::repository::{ExecutionRepository, StepRepository};
use crate::tool::ToolRegistry;

#[derive(Default)]
pub(crate) struct FakeExecutions {
    pub records: Mutex<Vec<WorkflowExecution>>,
    /// Every status written through `update`, in order.
    pub status_history: Mutex<Vec<ExecutionStatus>>,
}

impl ExecutionRepository for FakeExecutions {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.records.lock().unwrap().push(execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let slot = records
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = execution.clone();
        self.status_history.lock().unwrap().push(execution.status);
        Ok(())
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.records.lock().unwrap().iter().find(|e| e.id == *id).cloned())
    }

    async fn find_by_workflow_id(
        &self,
        workflow_id: &Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.workflow_id == *workflow_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn find_pending_or_running(&self) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeSteps {
    pub records: Mutex<Vec<WorkflowExecutionStep>>,
    /// Number of upcoming `update` calls to reject.
    failing_updates: AtomicU32,
}

impl FakeSteps {
    /// A store whose next `n` updates fail with a query error.
    pub fn failing_updates(n: u32) -> Self {
        Self {
            failing_updates: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn all(&self) -> Vec<WorkflowExecutionStep> {
        self.records.lock().unwrap().clone()
    }
}

impl StepRepository for FakeSteps {
    async fn create(&self, step: &WorkflowExecutionStep) -> Result<(), RepositoryError> {
        self.records.lock().unwrap().push(step.clone());
        Ok(())
    }

    async fn update(&self, step: &WorkflowExecutionStep) -> Result<(), RepositoryError> {
        let rejected = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(RepositoryError::Query("step store unavailable".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        let slot = records
            .iter_mut()
            .find(|s| s.id == step.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = step.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<WorkflowExecutionStep>, RepositoryError> {
        Ok(self.records.lock().unwrap().iter().find(|s| s.id == *id).cloned())
    }

    async fn find_by_execution_id(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowExecutionStep>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.execution_id == *execution_id)
            .cloned()
            .collect())
    }
}

/// Registry with `util.echo` (returns its `text` argument) and `util.flaky`
/// (error result for the first `failures` calls). Returns the flaky call counter.
pub(crate) fn tool_registry(failures: u32) -> (Arc<ToolRegistry>, Arc<AtomicU32>) {
    let registry = ToolRegistry::new();
    registry.register("util", "echo", |args: Map<String, Value>| async move {
        let text = args.get("text").and_then(Value::as_str).unwrap_or("").to_string();
        Ok(ToolCallResult::text(text))
    });

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    registry.register("util", "flaky", move |_args| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                Ok(ToolCallResult::error(format!("transient failure #{}", n + 1)))
            } else {
                Ok(ToolCallResult::text("recovered"))
            }
        }
    });
    (Arc::new(registry), calls)
}
