//! In-memory execution repository.

use dashmap::DashMap;
use owlflow_core::repository::ExecutionRepository;
use owlflow_types::error::RepositoryError;
use owlflow_types::execution::{ExecutionStatus, WorkflowExecution};
use uuid::Uuid;

/// Execution store backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    executions: DashMap<Uuid, WorkflowExecution>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    fn collect_where(&self, keep: impl Fn(&WorkflowExecution) -> bool) -> Vec<WorkflowExecution> {
        let mut found: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        // Newest first; v7 ids break ties in creation order.
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        found
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        if self.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut slot = self
            .executions
            .get_mut(&execution.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = execution.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_workflow_id(
        &self,
        workflow_id: &Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self
            .collect_where(|e| e.workflow_id == *workflow_id)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self.collect_where(|e| e.status == status))
    }

    async fn find_pending_or_running(&self) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self.collect_where(|e| {
            matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Running)
        }))
    }
}
