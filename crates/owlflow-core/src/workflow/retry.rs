//! Retry controller with bounded exponential backoff.
//!
//! Wraps [`StepExecutor::execute`] in up to `max_retries + 1` attempts.
//! Success, skip, and non-retryable failures return immediately. Before each
//! retry the controller sleeps for the backoff delay and persists the new
//! `retry_count` on the step record.

use std::sync::Arc;
use std::time::Duration;

use owlflow_types::error::RepositoryError;
use owlflow_types::event::ExecutionEvent;
use owlflow_types::execution::WorkflowExecutionStep;
use owlflow_types::workflow::Step;

use crate::event::EventBus;
use crate::repository::StepRepository;

use super::context::ExecutionContext;
use super::step_executor::{StepExecutor, StepResult};

pub struct RetryController<S: StepRepository> {
    steps: Arc<S>,
    event_bus: EventBus,
}

impl<S: StepRepository> RetryController<S> {
    pub fn new(steps: Arc<S>, event_bus: EventBus) -> Self {
        Self { steps, event_bus }
    }

    /// Run `step` under its retry policy (or the default policy).
    ///
    /// The only error is a failure to persist the retry count.
    pub async fn execute_with_retry(
        &self,
        executor: &StepExecutor,
        step: &Step,
        ctx: &mut ExecutionContext,
        record: &mut WorkflowExecutionStep,
    ) -> Result<StepResult, RepositoryError> {
        let policy = step.retry_policy.clone().unwrap_or_default();
        let mut last = StepResult::failure("step was not attempted");

        for attempt in 0..policy.total_attempts() {
            if attempt > 0 {
                let delay_ms = policy.delay_before_attempt_ms(attempt);
                let error = match &last {
                    StepResult::Failure { message, .. } => message.clone(),
                    _ => String::new(),
                };
                tracing::info!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    attempt,
                    delay_ms,
                    error = %error,
                    "retrying step"
                );
                self.event_bus.publish(ExecutionEvent::StepRetrying {
                    execution_id: ctx.execution_id,
                    step_id: step.id.clone(),
                    attempt,
                    delay_ms,
                    error,
                });

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                record.retry_count = attempt;
                self.steps.update(record).await?;
            }

            let result = executor.execute(step, ctx).await;
            if !result.is_retryable_failure() {
                return Ok(result);
            }
            last = result;
        }

        tracing::warn!(
            execution_id = %ctx.execution_id,
            step_id = %step.id,
            attempts = policy.total_attempts(),
            "retry budget exhausted"
        );
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::{FakeSteps, tool_registry};
    use owlflow_types::workflow::{RetryPolicy, StepConfig, ToolCallConfig};
    use serde_json::{Map, json};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use tokio::time::Instant;
    use uuid::Uuid;

    fn flaky_step(policy: RetryPolicy) -> Step {
        let mut step = Step::new(
            "flaky",
            StepConfig::ToolCall(ToolCallConfig {
                server: "util".to_string(),
                tool: "flaky".to_string(),
                arguments: Map::new(),
            }),
        );
        step.retry_policy = Some(policy);
        step
    }

    fn policy(max_retries: u32, initial: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: initial,
            max_delay_ms: max,
            backoff_multiplier: 2.0,
        }
    }

    fn test_context() -> ExecutionContext {
        ExecutionContext::new(Uuid::now_v7(), Uuid::now_v7(), "u1", HashMap::new(), HashMap::new())
    }

    async fn setup(step: &Step) -> (RetryController<FakeSteps>, Arc<FakeSteps>, EventBus, WorkflowExecutionStep) {
        let steps = Arc::new(FakeSteps::default());
        let bus = EventBus::new(64);
        let ctx = test_context();
        let record = WorkflowExecutionStep::start(ctx.execution_id, step);
        steps.create(&record).await.unwrap();
        (RetryController::new(Arc::clone(&steps), bus.clone()), steps, bus, record)
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_with_n_plus_one_attempts() {
        let (registry, calls) = tool_registry(u32::MAX);
        let executor = StepExecutor::new().with_tool_router(registry);
        let step = flaky_step(policy(3, 10, 1_000));
        let (controller, steps, _bus, mut record) = setup(&step).await;

        let result = controller
            .execute_with_retry(&executor, &step, &mut test_context(), &mut record)
            .await
            .unwrap();

        assert_eq!(result, StepResult::failure("transient failure #4"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(record.retry_count, 3);
        assert_eq!(steps.all()[0].retry_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_are_capped() {
        let (registry, _calls) = tool_registry(u32::MAX);
        let executor = StepExecutor::new().with_tool_router(registry);
        let step = flaky_step(policy(5, 1_000, 5_000));
        let (controller, _steps, bus, mut record) = setup(&step).await;
        let mut rx = bus.subscribe();

        let started = Instant::now();
        controller
            .execute_with_retry(&executor, &step, &mut test_context(), &mut record)
            .await
            .unwrap();

        let mut delays = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::StepRetrying { delay_ms, .. } = event {
                delays.push(delay_ms);
            }
        }
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000, 5_000]);
        assert!(started.elapsed() >= Duration::from_millis(17_000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_later_attempt() {
        let (registry, calls) = tool_registry(1);
        let executor = StepExecutor::new().with_tool_router(registry);
        let step = flaky_step(policy(3, 10, 1_000));
        let (controller, _steps, _bus, mut record) = setup(&step).await;

        let result = controller
            .execute_with_retry(&executor, &step, &mut test_context(), &mut record)
            .await
            .unwrap();

        assert_eq!(result, StepResult::Success(json!("recovered")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_short_circuits() {
        let executor = StepExecutor::new();
        let step = flaky_step(policy(3, 1_000, 5_000));
        let (controller, _steps, bus, mut record) = setup(&step).await;
        let mut rx = bus.subscribe();

        let started = Instant::now();
        let result = controller
            .execute_with_retry(&executor, &step, &mut test_context(), &mut record)
            .await
            .unwrap();

        assert_eq!(result, StepResult::fatal("tool router not configured"));
        assert_eq!(record.retry_count, 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(rx.try_recv().is_err());
    }
}
