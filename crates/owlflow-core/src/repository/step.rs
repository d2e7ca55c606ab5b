//! Step-execution repository trait definition.

use owlflow_types::error::RepositoryError;
use owlflow_types::execution::WorkflowExecutionStep;
use uuid::Uuid;

/// Repository trait for per-step execution records.
pub trait StepRepository: Send + Sync {
    fn create(
        &self,
        step: &WorkflowExecutionStep,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace an existing step record. Errors with `NotFound` if absent.
    fn update(
        &self,
        step: &WorkflowExecutionStep,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn find_by_id(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecutionStep>, RepositoryError>> + Send;

    /// All step records of an execution in creation order.
    fn find_by_execution_id(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecutionStep>, RepositoryError>> + Send;
}
