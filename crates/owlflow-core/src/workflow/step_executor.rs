//! Step executor for all seven step types.
//!
//! `StepExecutor` checks the step's gating condition, then dispatches on the
//! `StepConfig` variant under a per-attempt timeout. Capability errors never
//! escape: every outcome is folded into a [`StepResult`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use owlflow_types::workflow::{
    AiDecisionConfig, ConditionConfig, HttpRequestConfig, ParallelConfig, Step, StepConfig,
    ToolCallConfig, TransformConfig, WaitConfig,
};
use serde_json::{Map, Value, json};

use crate::http::{HttpClient, HttpError, HttpRequest};
use crate::tool::ToolRouter;

use super::ai_decision::{AiDecisionAdapter, AiDecisionError};
use super::context::ExecutionContext;
use super::expression::ExpressionEvaluator;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Per-attempt timeout for steps that don't declare one.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Outcome of one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Success(Value),
    Failure { message: String, retryable: bool },
    Skip(String),
}

impl StepResult {
    pub fn failure(message: impl Into<String>) -> Self {
        StepResult::Failure {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that must not be retried.
    pub fn fatal(message: impl Into<String>) -> Self {
        StepResult::Failure {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable_failure(&self) -> bool {
        matches!(self, StepResult::Failure { retryable: true, .. })
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors raised while dispatching a step. Converted to [`StepResult::Failure`].
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The capability this step needs was not wired in.
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    /// The tool server reported an error result.
    #[error("{0}")]
    Tool(String),

    #[error(transparent)]
    AiDecision(#[from] AiDecisionError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Step timed out after {0}ms")]
    Timeout(u64),

    /// A capability panicked mid-dispatch.
    #[error("Step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// Missing capabilities are configuration problems; everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StepError::NotConfigured(_))
    }
}

impl From<StepError> for StepResult {
    fn from(err: StepError) -> Self {
        StepResult::Failure {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Executes individual steps against the configured capabilities.
///
/// Every capability is optional; a step that needs a missing one fails
/// without retry.
pub struct StepExecutor {
    evaluator: ExpressionEvaluator,
    tool_router: Option<Arc<dyn ToolRouter>>,
    ai_decision: Option<Arc<AiDecisionAdapter>>,
    http_client: Option<Arc<dyn HttpClient>>,
    default_timeout_ms: u64,
}

impl StepExecutor {
    pub fn new() -> Self {
        Self {
            evaluator: ExpressionEvaluator::new(),
            tool_router: None,
            ai_decision: None,
            http_client: None,
            default_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
        }
    }

    pub fn with_tool_router(mut self, router: Arc<dyn ToolRouter>) -> Self {
        self.tool_router = Some(router);
        self
    }

    pub fn with_ai_decision(mut self, adapter: Arc<AiDecisionAdapter>) -> Self {
        self.ai_decision = Some(adapter);
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Run one attempt of `step`.
    ///
    /// A false `condition` short-circuits to [`StepResult::Skip`] before any
    /// timeout applies. Timeouts are retryable failures.
    pub async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult {
        if let Some(condition) = &step.condition {
            if !self.evaluator.evaluate_condition(condition, ctx) {
                tracing::debug!(step_id = %step.id, condition = %condition, "condition not met");
                return StepResult::Skip(format!("Condition not met: {condition}"));
            }
        }

        let timeout_ms = step.timeout_ms.unwrap_or(self.default_timeout_ms);
        tracing::debug!(
            step_id = %step.id,
            step_type = %step.step_type(),
            timeout_ms,
            "executing step"
        );

        let dispatch = AssertUnwindSafe(self.dispatch(step, ctx)).catch_unwind();
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), dispatch).await;

        match outcome {
            Ok(Ok(Ok(output))) => StepResult::Success(output),
            Ok(Ok(Err(err))) => {
                tracing::warn!(step_id = %step.id, error = %err, "step attempt failed");
                err.into()
            }
            Ok(Err(payload)) => {
                let err = StepError::Panicked(panic_message(payload.as_ref()));
                tracing::error!(step_id = %step.id, error = %err, "step attempt panicked");
                err.into()
            }
            Err(_elapsed) => {
                tracing::warn!(step_id = %step.id, timeout_ms, "step attempt timed out");
                StepError::Timeout(timeout_ms).into()
            }
        }
    }

    async fn dispatch(&self, step: &Step, ctx: &mut ExecutionContext) -> Result<Value, StepError> {
        match &step.config {
            StepConfig::ToolCall(config) => self.run_tool_call(config, ctx).await,
            StepConfig::AiDecision(config) => self.run_ai_decision(config, ctx).await,
            StepConfig::Condition(config) => Ok(self.run_condition(config, ctx)),
            StepConfig::Parallel(config) => Ok(run_parallel(config)),
            StepConfig::Wait(config) => Ok(run_wait(config).await),
            StepConfig::Transform(config) => Ok(self.run_transform(config, ctx)),
            StepConfig::HttpRequest(config) => self.run_http_request(config, ctx).await,
        }
    }

    async fn run_tool_call(
        &self,
        config: &ToolCallConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError> {
        let router = self
            .tool_router
            .as_ref()
            .ok_or(StepError::NotConfigured("tool router"))?;

        let arguments = self.evaluator.evaluate_arguments(&config.arguments, ctx);
        let result = router.call_tool(&config.server, &config.tool, arguments).await;

        if result.is_error {
            let message = result.first_text().unwrap_or("Tool call failed").to_string();
            return Err(StepError::Tool(message));
        }
        Ok(Value::String(result.joined_text()))
    }

    async fn run_ai_decision(
        &self,
        config: &AiDecisionConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError> {
        let adapter = self
            .ai_decision
            .as_ref()
            .ok_or(StepError::NotConfigured("AI decision maker"))?;
        let decision = adapter.make_decision(config, ctx).await?;
        Ok(decision.output)
    }

    /// Records the selected branch. Branch steps are not dispatched from here;
    /// the run loop stays linear.
    fn run_condition(&self, config: &ConditionConfig, ctx: &ExecutionContext) -> Value {
        let result = self.evaluator.evaluate_condition(&config.expression, ctx);
        let (branch, next_steps) = if result {
            ("then", &config.then_steps)
        } else {
            ("else", &config.else_steps)
        };
        json!({
            "result": result,
            "branch": branch,
            "next_steps": next_steps,
        })
    }

    fn run_transform(&self, config: &TransformConfig, ctx: &mut ExecutionContext) -> Value {
        let value = self.evaluator.evaluate_to_value(&config.expression, ctx);
        ctx.set_variable(&config.output_key, value.clone());

        let mut output = Map::new();
        output.insert(config.output_key.clone(), value);
        Value::Object(output)
    }

    async fn run_http_request(
        &self,
        config: &HttpRequestConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError> {
        let client = self
            .http_client
            .as_ref()
            .ok_or(StepError::NotConfigured("HTTP client"))?;

        let headers: HashMap<String, String> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), self.evaluator.evaluate(v, ctx)))
            .collect();
        let request = HttpRequest {
            method: config.method.clone(),
            url: self.evaluator.evaluate(&config.url, ctx),
            headers,
            body: config.body.clone(),
        };

        let response = client.send(request).await?;
        Ok(json!({
            "status": response.status,
            "body": response.body_value(),
        }))
    }
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("tool_router", &self.tool_router.is_some())
            .field("ai_decision", &self.ai_decision.is_some())
            .field("http_client", &self.http_client.is_some())
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish()
    }
}

/// Summarizes the declared branches without running them.
fn run_parallel(config: &ParallelConfig) -> Value {
    json!({
        "branches": config.branches.len(),
        "wait_for": config.wait_for.as_str(),
    })
}

async fn run_wait(config: &WaitConfig) -> Value {
    let waited_ms = config.duration_ms.unwrap_or(0);
    if waited_ms > 0 {
        tokio::time::sleep(Duration::from_millis(waited_ms)).await;
    }
    json!({ "waited_ms": waited_ms })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
