//! In-memory step repository.

use dashmap::DashMap;
use owlflow_core::repository::StepRepository;
use owlflow_types::error::RepositoryError;
use owlflow_types::execution::WorkflowExecutionStep;
use uuid::Uuid;

/// Step store backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryStepRepository {
    steps: DashMap<Uuid, WorkflowExecutionStep>,
}

impl InMemoryStepRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepRepository for InMemoryStepRepository {
    async fn create(&self, step: &WorkflowExecutionStep) -> Result<(), RepositoryError> {
        if self.steps.contains_key(&step.id) {
            return Err(RepositoryError::Conflict(format!(
                "step record {} already exists",
                step.id
            )));
        }
        self.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn update(&self, step: &WorkflowExecutionStep) -> Result<(), RepositoryError> {
        let mut slot = self.steps.get_mut(&step.id).ok_or(RepositoryError::NotFound)?;
        *slot = step.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<WorkflowExecutionStep>, RepositoryError> {
        Ok(self.steps.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_execution_id(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowExecutionStep>, RepositoryError> {
        let mut found: Vec<WorkflowExecutionStep> = self
            .steps
            .iter()
            .filter(|entry| entry.execution_id == *execution_id)
            .map(|entry| entry.value().clone())
            .collect();
        // Record ids are v7, so id order is creation order.
        found.sort_by_key(|s| s.id);
        Ok(found)
    }
}
