//! Workflow engine: one spawned task per execution, linear step cursor.
//!
//! # Execution flow
//!
//! 1. `execute_workflow` validates the workflow, persists a PENDING
//!    `WorkflowExecution`, registers a cancellation handle, and spawns the run.
//! 2. The run seeds an `ExecutionContext` from the input and the definition's
//!    variables, then moves the lifecycle to RUNNING.
//! 3. For each step in order: persist `current_step_id`, create a RUNNING step
//!    record, run it through the retry controller, and record the outcome.
//! 4. Success folds the output into the context, skip records the reason, and
//!    failure aborts the run.
//! 5. The final status, output, error, and context snapshot are persisted and
//!    the run is removed from the active registry. A supervisor task does the
//!    removal, so a panicking run is still released (and marked FAILED).
//!
//! Cancellation is cooperative: the in-flight step future is dropped at its
//! next suspension point, its record is marked CANCELED, and no further steps
//! begin.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use owlflow_types::error::{RepositoryError, WorkflowError};
use owlflow_types::event::ExecutionEvent;
use owlflow_types::execution::{
    ExecutionError, ExecutionStatus, StepStatus, WorkflowExecution, WorkflowExecutionStep,
};
use owlflow_types::workflow::{Step, Workflow, WorkflowDefinition};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::{ExecutionRepository, StepRepository};

use super::context::ExecutionContext;
use super::definition::validate_definition;
use super::lifecycle::{
    ExecutionLifecycle, LifecycleError, LifecycleEvent, LifecycleObserver, TracingObserver,
};
use super::retry::RetryController;
use super::step_executor::{StepExecutor, StepResult};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors returned synchronously by [`WorkflowEngine::execute_workflow`].
///
/// Failures during the run itself are never returned here; they are recorded
/// on the execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow '{0}' is disabled")]
    WorkflowDisabled(String),

    #[error(transparent)]
    InvalidDefinition(#[from] WorkflowError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Handles for one in-flight execution.
#[derive(Debug, Clone)]
struct RunHandle {
    cancel: CancellationToken,
    /// Cancelled once the final state has been persisted.
    done: CancellationToken,
}

/// Runs workflow executions as independent tokio tasks.
///
/// Generic over the execution and step stores for storage flexibility.
pub struct WorkflowEngine<E: ExecutionRepository, S: StepRepository> {
    executions: Arc<E>,
    steps: Arc<S>,
    executor: Arc<StepExecutor>,
    event_bus: EventBus,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    /// Active runs keyed by execution id.
    active: Arc<DashMap<Uuid, RunHandle>>,
}

impl<E, S> WorkflowEngine<E, S>
where
    E: ExecutionRepository + 'static,
    S: StepRepository + 'static,
{
    /// Create an engine. A [`TracingObserver`] is always registered.
    pub fn new(executions: Arc<E>, steps: Arc<S>, executor: StepExecutor, event_bus: EventBus) -> Self {
        Self {
            executions,
            steps,
            executor: Arc::new(executor),
            event_bus,
            observers: vec![Arc::new(TracingObserver)],
            active: Arc::new(DashMap::new()),
        }
    }

    /// Register an additional lifecycle observer for future executions.
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Accept a run of `workflow` and start it in the background.
    ///
    /// Returns the freshly persisted PENDING record. Disabled workflows and
    /// invalid definitions are rejected before anything is persisted.
    pub async fn execute_workflow(
        &self,
        workflow: &Workflow,
        input: HashMap<String, Value>,
        trigger_type: &str,
    ) -> Result<WorkflowExecution, EngineError> {
        if !workflow.enabled {
            return Err(EngineError::WorkflowDisabled(workflow.name.clone()));
        }
        validate_definition(&workflow.definition)?;

        let execution = WorkflowExecution::new(workflow.id, &workflow.user_id, trigger_type, input);
        self.executions.create(&execution).await?;

        let handle = RunHandle {
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        };
        self.active.insert(execution.id, handle.clone());

        let run = RunLoop {
            executions: Arc::clone(&self.executions),
            steps: Arc::clone(&self.steps),
            executor: Arc::clone(&self.executor),
            retry: RetryController::new(Arc::clone(&self.steps), self.event_bus.clone()),
            event_bus: self.event_bus.clone(),
            observers: self.observers.clone(),
        };
        let active = Arc::clone(&self.active);
        let executions = Arc::clone(&self.executions);
        let event_bus = self.event_bus.clone();
        let execution_id = execution.id;
        let span = tracing::info_span!(
            "workflow_execution",
            execution_id = %execution_id,
            workflow = %workflow.name,
        );
        let definition = workflow.definition.clone();
        let record = execution.clone();

        let worker = tokio::spawn(run.run(record, definition, handle.cancel.clone()).instrument(span));
        // Supervisor: the run leaves the registry even if its task panics.
        tokio::spawn(async move {
            if let Err(join_error) = worker.await {
                tracing::error!(
                    execution_id = %execution_id,
                    error = %join_error,
                    "execution task panicked"
                );
                fail_abandoned(executions.as_ref(), &event_bus, execution_id, &join_error).await;
            }
            active.remove(&execution_id);
            handle.done.cancel();
        });

        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %workflow.id,
            trigger = trigger_type,
            "execution accepted"
        );
        Ok(execution)
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `true` if the execution was active and not already cancelled.
    pub fn cancel_execution(&self, execution_id: Uuid) -> bool {
        let Some(handle) = self.active.get(&execution_id).map(|h| h.cancel.clone()) else {
            return false;
        };
        if handle.is_cancelled() {
            return false;
        }
        handle.cancel();
        tracing::info!(execution_id = %execution_id, "cancellation requested");
        true
    }

    pub async fn get_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        self.executions.find_by_id(&execution_id).await
    }

    /// Wait until the execution's final state is persisted, then read it.
    pub async fn wait_for_completion(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let done = self.active.get(&execution_id).map(|h| h.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
        self.executions.find_by_id(&execution_id).await
    }

    pub fn is_active(&self, execution_id: Uuid) -> bool {
        self.active.contains_key(&execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl<E: ExecutionRepository, S: StepRepository> std::fmt::Debug for WorkflowEngine<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("active", &self.active.len())
            .field("executor", &self.executor)
            .finish()
    }
}

/// Persist FAILED for a run whose task died before writing a terminal state.
async fn fail_abandoned<E: ExecutionRepository>(
    executions: &E,
    event_bus: &EventBus,
    execution_id: Uuid,
    join_error: &tokio::task::JoinError,
) {
    let mut execution = match executions.find_by_id(&execution_id).await {
        Ok(Some(execution)) if !execution.status.is_terminal() => execution,
        Ok(_) => return,
        Err(err) => {
            tracing::error!(execution_id = %execution_id, error = %err, "failed to load abandoned execution");
            return;
        }
    };

    execution.error = Some(ExecutionError::unexpected(format!(
        "Execution task panicked: {join_error}"
    )));
    execution.finish(ExecutionStatus::Failed);
    if let Err(err) = executions.update(&execution).await {
        tracing::error!(execution_id = %execution_id, error = %err, "failed to persist abandoned execution");
    }
    event_bus.publish(ExecutionEvent::RunFinished {
        execution_id,
        status: ExecutionStatus::Failed,
    });
}

// ---------------------------------------------------------------------------
// RunLoop
// ---------------------------------------------------------------------------

/// Why a run stopped before finishing its steps.
#[derive(Debug)]
enum RunAbort {
    StepFailed { step_id: String, message: String },
    Canceled,
    Unexpected(String),
}

impl From<RepositoryError> for RunAbort {
    fn from(err: RepositoryError) -> Self {
        RunAbort::Unexpected(err.to_string())
    }
}

impl From<LifecycleError> for RunAbort {
    fn from(err: LifecycleError) -> Self {
        RunAbort::Unexpected(err.to_string())
    }
}

/// Everything one spawned run needs. Owned by the task.
struct RunLoop<E: ExecutionRepository, S: StepRepository> {
    executions: Arc<E>,
    steps: Arc<S>,
    executor: Arc<StepExecutor>,
    retry: RetryController<S>,
    event_bus: EventBus,
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl<E: ExecutionRepository, S: StepRepository> RunLoop<E, S> {
    async fn run(
        self,
        mut execution: WorkflowExecution,
        definition: WorkflowDefinition,
        cancel: CancellationToken,
    ) {
        let mut lifecycle = ExecutionLifecycle::new(execution.id, self.observers.clone());
        let mut ctx = ExecutionContext::new(
            execution.id,
            execution.workflow_id,
            execution.user_id.clone(),
            execution.input.clone(),
            definition.variables.clone(),
        );

        self.event_bus.publish(ExecutionEvent::RunStarted {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            workflow_name: definition.name.clone(),
        });

        let outcome = self
            .drive(&mut execution, &definition, &mut ctx, &mut lifecycle, &cancel)
            .await;

        let (event, status) = match outcome {
            Ok(output) => {
                execution.output = output;
                (LifecycleEvent::Complete, ExecutionStatus::Completed)
            }
            Err(RunAbort::StepFailed { step_id, message }) => {
                let text = format!("Step {step_id} failed: {message}");
                execution.error = Some(ExecutionError::workflow_failed(step_id, text));
                (LifecycleEvent::Fail, ExecutionStatus::Failed)
            }
            Err(RunAbort::Canceled) => (LifecycleEvent::Cancel, ExecutionStatus::Canceled),
            Err(RunAbort::Unexpected(message)) => {
                tracing::error!(execution_id = %execution.id, error = %message, "execution aborted");
                execution.error = Some(ExecutionError::unexpected(message));
                (LifecycleEvent::Fail, ExecutionStatus::Failed)
            }
        };

        let status = match lifecycle.fire(event) {
            Ok(state) => state.execution_status(),
            Err(err) => {
                // Only reachable when the run aborted before it started.
                tracing::warn!(execution_id = %execution.id, error = %err, "forcing terminal status");
                status
            }
        };

        execution.state_snapshot = ctx.snapshot();
        execution.finish(status);
        if let Err(err) = self.executions.update(&execution).await {
            tracing::error!(
                execution_id = %execution.id,
                error = %err,
                "failed to persist final execution state"
            );
        }

        self.event_bus.publish(ExecutionEvent::RunFinished {
            execution_id: execution.id,
            status,
        });
        tracing::info!(execution_id = %execution.id, status = %status, "execution finished");
    }

    /// Advance through the steps. Returns the final output on success.
    async fn drive(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        lifecycle: &mut ExecutionLifecycle,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, RunAbort> {
        let state = lifecycle.fire(LifecycleEvent::Start)?;
        execution.status = state.execution_status();
        self.executions.update(execution).await?;

        for step in &definition.steps {
            if cancel.is_cancelled() {
                return Err(RunAbort::Canceled);
            }

            execution.current_step_id = Some(step.id.clone());
            self.executions.update(execution).await?;

            let mut record = WorkflowExecutionStep::start(execution.id, step);
            self.steps.create(&record).await?;
            self.event_bus.publish(ExecutionEvent::StepStarted {
                execution_id: execution.id,
                step_id: step.id.clone(),
                step_type: step.step_type(),
            });
            tracing::debug!(step_id = %step.id, step_type = %step.step_type(), "step started");

            let outcome = self.run_step(step, ctx, &mut record, cancel).await;
            if let Err(RunAbort::Unexpected(message)) = &outcome {
                self.abandon_step(&mut record, message).await;
            }
            outcome?;
        }

        Ok(definition
            .steps
            .last()
            .and_then(|last| ctx.step_output(&last.id).cloned()))
    }

    /// Run one step to its final record state.
    async fn run_step(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        record: &mut WorkflowExecutionStep,
        cancel: &CancellationToken,
    ) -> Result<(), RunAbort> {
        let execution_id = record.execution_id;
        let started = Instant::now();
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.retry.execute_with_retry(&self.executor, step, ctx, record) => Some(result),
        };

        let Some(result) = attempt else {
            record.finish(StepStatus::Canceled);
            self.steps.update(record).await?;
            tracing::info!(step_id = %step.id, "step canceled");
            return Err(RunAbort::Canceled);
        };

        match result? {
            StepResult::Success(output) => {
                ctx.set_step_output(&step.id, output.clone());
                record.output = Some(output);
                record.finish(StepStatus::Completed);
                self.steps.update(record).await?;
                self.event_bus.publish(ExecutionEvent::StepCompleted {
                    execution_id,
                    step_id: step.id.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Ok(())
            }
            StepResult::Skip(reason) => {
                record.output = Some(Value::String(reason.clone()));
                record.finish(StepStatus::Skipped);
                self.steps.update(record).await?;
                self.event_bus.publish(ExecutionEvent::StepSkipped {
                    execution_id,
                    step_id: step.id.clone(),
                    reason,
                });
                Ok(())
            }
            StepResult::Failure { message, .. } => {
                record.error = Some(ExecutionError::step_failed(&step.id, &message));
                record.finish(StepStatus::Failed);
                self.steps.update(record).await?;
                self.event_bus.publish(ExecutionEvent::StepFailed {
                    execution_id,
                    step_id: step.id.clone(),
                    error: message.clone(),
                });
                Err(RunAbort::StepFailed {
                    step_id: step.id.clone(),
                    message,
                })
            }
        }
    }

    /// Best-effort FAILED write for a step whose run aborted unexpectedly.
    async fn abandon_step(&self, record: &mut WorkflowExecutionStep, message: &str) {
        record.error = Some(ExecutionError::step_failed(&record.step_id, message));
        record.finish(StepStatus::Failed);
        if let Err(err) = self.steps.update(record).await {
            tracing::warn!(step_id = %record.step_id, error = %err, "failed to mark step failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRegistry;
    use crate::workflow::lifecycle::LifecycleState;
    use crate::workflow::testing::{FakeExecutions, FakeSteps, tool_registry};
    use owlflow_types::tool::ToolCallResult;
    use owlflow_types::workflow::{
        RetryPolicy, Step, StepConfig, ToolCallConfig, TransformConfig, Trigger, WaitConfig,
    };
    use serde_json::{Map, json};
    use std::time::Duration;

    type TestEngine = WorkflowEngine<FakeExecutions, FakeSteps>;

    fn engine(registry: Option<Arc<ToolRegistry>>) -> (TestEngine, Arc<FakeExecutions>, Arc<FakeSteps>) {
        engine_with_steps(FakeSteps::default(), registry)
    }

    fn engine_with_steps(
        steps: FakeSteps,
        registry: Option<Arc<ToolRegistry>>,
    ) -> (TestEngine, Arc<FakeExecutions>, Arc<FakeSteps>) {
        let executions = Arc::new(FakeExecutions::default());
        let steps = Arc::new(steps);
        let mut executor = StepExecutor::new();
        if let Some(registry) = registry {
            executor = executor.with_tool_router(registry);
        }
        let engine = WorkflowEngine::new(
            Arc::clone(&executions),
            Arc::clone(&steps),
            executor,
            EventBus::new(256),
        );
        (engine, executions, steps)
    }

    fn workflow(steps: Vec<Step>) -> Workflow {
        Workflow::new(
            "user-1",
            WorkflowDefinition {
                name: "test-flow".to_string(),
                description: None,
                trigger: Trigger::default(),
                steps,
                variables: HashMap::from([("team".to_string(), json!("platform"))]),
            },
        )
    }

    fn input(value: Value) -> HashMap<String, Value> {
        value
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn transform(id: &str, expression: &str, key: &str) -> Step {
        Step::new(
            id,
            StepConfig::Transform(TransformConfig {
                expression: expression.to_string(),
                output_key: key.to_string(),
            }),
        )
    }

    fn tool(id: &str, name: &str, arguments: Value) -> Step {
        Step::new(
            id,
            StepConfig::ToolCall(ToolCallConfig {
                server: "util".to_string(),
                tool: name.to_string(),
                arguments: arguments.as_object().cloned().unwrap_or_else(Map::new),
            }),
        )
    }

    fn wait(id: &str, ms: u64) -> Step {
        Step::new(
            id,
            StepConfig::Wait(WaitConfig {
                duration_ms: Some(ms),
                until: None,
            }),
        )
    }

    async fn run_to_end(engine: &TestEngine, wf: &Workflow, inputs: Value) -> WorkflowExecution {
        let accepted = engine.execute_workflow(wf, input(inputs), "manual").await.unwrap();
        engine.wait_for_completion(accepted.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn zero_steps_completes_with_null_output() {
        let (engine, executions, _) = engine(None);
        let wf = workflow(Vec::new());

        let accepted = engine.execute_workflow(&wf, HashMap::new(), "manual").await.unwrap();
        assert_eq!(accepted.status, ExecutionStatus::Pending);

        let done = engine.wait_for_completion(accepted.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(done.output.is_none());
        assert!(done.completed_at.is_some());
        assert_eq!(done.state_snapshot["variables"]["team"], "platform");
        assert!(!engine.is_active(accepted.id));
        assert_eq!(engine.active_count(), 0);
        assert_eq!(
            *executions.status_history.lock().unwrap(),
            vec![ExecutionStatus::Running, ExecutionStatus::Completed]
        );
    }

    #[tokio::test]
    async fn transform_then_echo_produces_bob() {
        let (registry, _) = tool_registry(0);
        let (engine, _, steps) = engine(Some(registry));
        let wf = workflow(vec![
            transform("greet", "${inputs.name}", "greeting"),
            tool("echo", "echo", json!({ "text": "${variables.greeting}" })),
        ]);

        let done = run_to_end(&engine, &wf, json!({ "name": "Bob" })).await;

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.output, Some(json!("Bob")));
        assert_eq!(done.current_step_id.as_deref(), Some("echo"));
        assert_eq!(done.state_snapshot["variables"]["greeting"], "Bob");
        assert_eq!(done.state_snapshot["step_outputs"]["greet"], json!({ "greeting": "Bob" }));

        let records = steps.all();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == StepStatus::Completed));
        assert!(records.iter().all(|r| r.completed_at.is_some()));
        assert_eq!(records[0].input["type"], "transform");
    }

    #[tokio::test]
    async fn false_condition_skips_and_continues() {
        let (engine, _, steps) = engine(None);
        let mut gated = transform("gated", "never", "unused");
        gated.condition = Some("${inputs.enabled}".to_string());
        let wf = workflow(vec![gated, transform("after", "ran", "after")]);

        let done = run_to_end(&engine, &wf, json!({ "enabled": false })).await;

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.output, Some(json!({ "after": "ran" })));
        assert!(done.state_snapshot["step_outputs"].get("gated").is_none());
        assert!(done.state_snapshot["variables"].get("unused").is_none());

        let records = steps.all();
        assert_eq!(records[0].status, StepStatus::Skipped);
        assert_eq!(
            records[0].output,
            Some(json!("Condition not met: ${inputs.enabled}"))
        );
        assert_eq!(records[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn skipped_last_step_yields_null_output() {
        let (engine, _, _) = engine(None);
        let mut gated = transform("gated", "x", "x");
        gated.condition = Some("no".to_string());
        let wf = workflow(vec![transform("first", "1", "one"), gated]);

        let done = run_to_end(&engine, &wf, json!({})).await;
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(done.output.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_workflow() {
        let (registry, calls) = tool_registry(u32::MAX);
        let (engine, _, steps) = engine(Some(registry));
        let mut flaky = tool("flaky", "flaky", json!({}));
        flaky.retry_policy = Some(RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        });
        let wf = workflow(vec![flaky, transform("never", "x", "x")]);

        let done = run_to_end(&engine, &wf, json!({})).await;

        assert_eq!(done.status, ExecutionStatus::Failed);
        let error = done.error.unwrap();
        assert_eq!(error.code, ExecutionError::WORKFLOW_FAILED);
        assert_eq!(error.step_id.as_deref(), Some("flaky"));
        assert_eq!(error.message, "Step flaky failed: transient failure #3");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);

        let records = steps.all();
        assert_eq!(records.len(), 1, "no step after the failure is started");
        assert_eq!(records[0].status, StepStatus::Failed);
        assert_eq!(records[0].retry_count, 2);
        let step_error = records[0].error.clone().unwrap();
        assert_eq!(step_error.code, ExecutionError::STEP_FAILED);
        assert_eq!(step_error.message, "transient failure #3");
    }

    #[tokio::test]
    async fn missing_capability_fails_without_retry() {
        let (engine, _, steps) = engine(None);
        let wf = workflow(vec![tool("call", "echo", json!({}))]);

        let done = run_to_end(&engine, &wf, json!({})).await;

        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(
            done.error.unwrap().message,
            "Step call failed: tool router not configured"
        );
        assert_eq!(steps.all()[0].retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_run() {
        let (engine, executions, steps) = engine(None);
        let wf = workflow(vec![wait("long", 60_000), transform("after", "x", "x")]);

        let accepted = engine.execute_workflow(&wf, HashMap::new(), "manual").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.is_active(accepted.id));

        assert!(engine.cancel_execution(accepted.id));
        assert!(!engine.cancel_execution(accepted.id), "second cancel is a no-op");

        let done = engine.wait_for_completion(accepted.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Canceled);
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());

        let records = steps.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, StepStatus::Canceled);
        assert!(!engine.is_active(accepted.id));
        assert!(executions.find_pending_or_running().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_tool_fails_the_step_and_finishes_the_run() {
        let registry = ToolRegistry::new();
        registry.register("util", "boom", |args: Map<String, Value>| async move {
            assert!(args.contains_key("fuse"), "tool exploded");
            Ok(ToolCallResult::text("defused"))
        });
        let (engine, _, steps) = engine(Some(Arc::new(registry)));
        let mut boom = tool("boom", "boom", json!({}));
        boom.retry_policy = Some(RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        });
        let wf = workflow(vec![boom]);

        let accepted = engine.execute_workflow(&wf, HashMap::new(), "manual").await.unwrap();
        let done = tokio::time::timeout(Duration::from_secs(2), engine.wait_for_completion(accepted.id))
            .await
            .expect("run should finish")
            .unwrap()
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        let error = done.error.unwrap();
        assert_eq!(error.code, ExecutionError::WORKFLOW_FAILED);
        assert_eq!(error.message, "Step boom failed: Step panicked: tool exploded");
        assert!(!engine.is_active(accepted.id));
        assert_eq!(steps.all()[0].status, StepStatus::Failed);
    }

    /// Panics when a run enters RUNNING, outside any step dispatch.
    struct PanicOnRunning;

    impl LifecycleObserver for PanicOnRunning {
        fn on_transition(
            &self,
            _execution_id: Uuid,
            _from: LifecycleState,
            to: LifecycleState,
            _event: LifecycleEvent,
        ) {
            assert_ne!(to, LifecycleState::Running, "observer exploded");
        }
    }

    #[tokio::test]
    async fn panicking_run_task_is_marked_failed_and_released() {
        let (engine, executions, _) = engine(None);
        let engine = engine.with_observer(Arc::new(PanicOnRunning));
        let mut rx = engine.event_bus().subscribe();
        let wf = workflow(vec![transform("only", "v", "k")]);

        let accepted = engine.execute_workflow(&wf, HashMap::new(), "manual").await.unwrap();
        let done = tokio::time::timeout(Duration::from_secs(2), engine.wait_for_completion(accepted.id))
            .await
            .expect("run should finish")
            .unwrap()
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        assert!(done.completed_at.is_some());
        let error = done.error.unwrap();
        assert_eq!(error.code, ExecutionError::UNEXPECTED_ERROR);
        assert!(error.message.starts_with("Execution task panicked"), "{}", error.message);
        assert!(!engine.is_active(accepted.id));
        assert!(executions.find_pending_or_running().await.unwrap().is_empty());

        let mut finished = None;
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::RunFinished { status, .. } = event {
                finished = Some(status);
            }
        }
        assert_eq!(finished, Some(ExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn store_failure_ends_run_with_unexpected_error() {
        let (engine, _, steps) = engine_with_steps(FakeSteps::failing_updates(1), None);
        let wf = workflow(vec![transform("first", "1", "one"), transform("second", "2", "two")]);

        let done = run_to_end(&engine, &wf, json!({})).await;

        assert_eq!(done.status, ExecutionStatus::Failed);
        let error = done.error.unwrap();
        assert_eq!(error.code, ExecutionError::UNEXPECTED_ERROR);
        assert_eq!(error.message, "query error: step store unavailable");
        assert!(error.step_id.is_none());
        assert_eq!(done.state_snapshot["variables"]["team"], "platform");
        assert!(!engine.is_active(done.id));

        let records = steps.all();
        assert_eq!(records.len(), 1, "no step after the abort is started");
        assert_eq!(records[0].status, StepStatus::Failed);
        assert!(records[0].completed_at.is_some());
        assert_eq!(
            records[0].error.as_ref().map(|e| e.message.as_str()),
            Some("query error: step store unavailable")
        );
    }

    #[tokio::test]
    async fn cancel_unknown_execution_returns_false() {
        let (engine, _, _) = engine(None);
        assert!(!engine.cancel_execution(Uuid::now_v7()));
    }

    #[tokio::test]
    async fn disabled_workflow_is_rejected_without_records() {
        let (engine, executions, _) = engine(None);
        let mut wf = workflow(Vec::new());
        wf.enabled = false;

        let err = engine.execute_workflow(&wf, HashMap::new(), "manual").await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowDisabled(_)));
        assert!(executions.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected() {
        let (engine, executions, _) = engine(None);
        let wf = workflow(vec![transform("dup", "a", "a"), transform("dup", "b", "b")]);

        let err = engine.execute_workflow(&wf, HashMap::new(), "manual").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition(_)));
        assert!(err.to_string().contains("duplicate step id 'dup'"));
        assert!(executions.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publishes_progress_events_in_order() {
        let (engine, _, _) = engine(None);
        let mut rx = engine.event_bus().subscribe();
        let wf = workflow(vec![transform("only", "v", "k")]);

        let done = run_to_end(&engine, &wf, json!({})).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.execution_id(), done.id);
            kinds.push(match event {
                ExecutionEvent::RunStarted { .. } => "run_started",
                ExecutionEvent::StepStarted { .. } => "step_started",
                ExecutionEvent::StepCompleted { .. } => "step_completed",
                ExecutionEvent::RunFinished { status, .. } => {
                    assert_eq!(status, ExecutionStatus::Completed);
                    "run_finished"
                }
                other => panic!("unexpected event {other:?}"),
            });
        }
        assert_eq!(kinds, vec!["run_started", "step_started", "step_completed", "run_finished"]);
    }

    #[tokio::test]
    async fn execution_is_queryable_by_workflow() {
        let (engine, executions, _) = engine(None);
        let wf = workflow(Vec::new());
        let done = run_to_end(&engine, &wf, json!({ "k": 1 })).await;

        let found = engine.get_execution_status(done.id).await.unwrap().unwrap();
        assert_eq!(found.input["k"], 1);
        let listed = executions.find_by_workflow_id(&wf.id, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].trigger_type, "manual");
    }
}
