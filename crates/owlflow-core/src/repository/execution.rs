//! Execution repository trait definition.

use owlflow_types::error::RepositoryError;
use owlflow_types::execution::{ExecutionStatus, WorkflowExecution};
use uuid::Uuid;

/// Repository trait for workflow execution records.
///
/// `update` must be durable before it returns: the engine treats every update
/// as committed and moves on to the next step.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution record.
    fn create(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace an existing execution record. Errors with `NotFound` if absent.
    fn update(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn find_by_id(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Executions of one workflow, newest first, with offset pagination.
    fn find_by_workflow_id(
        &self,
        workflow_id: &Uuid,
        limit: usize,
        offset: usize,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Executions that have not reached a terminal state yet.
    fn find_pending_or_running(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;
}
