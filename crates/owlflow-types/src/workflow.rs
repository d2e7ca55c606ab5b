//! Workflow definition types for owlflow.
//!
//! `WorkflowDefinition` is the immutable, declarative shape of a workflow: one
//! trigger, an ordered list of steps, and the initial variables. `Workflow`
//! wraps a definition with ownership and bookkeeping fields.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A stored workflow: a definition plus its owner and lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Human-readable workflow name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub definition: WorkflowDefinition,
    /// Disabled workflows are rejected by the engine before any record is created.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Workflow {
    /// Wrap a definition in a fresh, enabled workflow record.
    pub fn new(user_id: impl Into<String>, definition: WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            definition,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The declarative workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the workflow is started. Defaults to a manual trigger.
    #[serde(default)]
    pub trigger: Trigger,
    /// Steps executed in order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Initial variables seeded into every execution context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
}

/// How a workflow can be triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Incoming webhook.
    Webhook {
        path: String,
        #[serde(default = "default_webhook_method")]
        method: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    /// Cron schedule.
    Schedule {
        cron: String,
        #[serde(default = "default_timezone")]
        timezone: String,
    },
    /// Started explicitly through the API or CLI.
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_schema: Option<Value>,
    },
    /// Event emitted by an upstream tool server.
    McpEvent { server_id: String, event_type: String },
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Manual { input_schema: None }
    }
}

impl Trigger {
    /// Short machine-readable trigger kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Webhook { .. } => "webhook",
            Trigger::Schedule { .. } => "schedule",
            Trigger::Manual { .. } => "manual",
            Trigger::McpEvent { .. } => "mcp_event",
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One declared unit of work.
///
/// The step type is carried by the [`StepConfig`] variant, so a step whose
/// type and configuration disagree cannot be constructed. On the wire the
/// type is an explicit `type` field next to an untyped `config` object; the
/// pair is checked during deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepWire", into = "StepWire")]
pub struct Step {
    /// Unique within a definition; used for output lookup.
    pub id: String,
    pub name: Option<String>,
    pub config: StepConfig,
    /// Gating expression; the step is skipped when it evaluates false.
    pub condition: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Step {
    /// Create a step with no condition, retry policy, or timeout.
    pub fn new(id: impl Into<String>, config: StepConfig) -> Self {
        Self {
            id: id.into(),
            name: None,
            config,
            condition: None,
            retry_policy: None,
            timeout_ms: None,
        }
    }

    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }

    /// The display name, falling back to the step ID.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Wire form of a [`Step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepWire {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type")]
    step_type: StepType,
    #[serde(default)]
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl TryFrom<StepWire> for Step {
    type Error = String;

    fn try_from(wire: StepWire) -> Result<Self, Self::Error> {
        let config = StepConfig::from_parts(wire.step_type, wire.config).map_err(|e| {
            format!(
                "step '{}': invalid {} config: {e}",
                wire.id, wire.step_type
            )
        })?;
        Ok(Step {
            id: wire.id,
            name: wire.name,
            config,
            condition: wire.condition,
            retry_policy: wire.retry_policy,
            timeout_ms: wire.timeout_ms,
        })
    }
}

impl From<Step> for StepWire {
    fn from(step: Step) -> Self {
        StepWire {
            step_type: step.config.step_type(),
            config: step.config.to_value(),
            id: step.id,
            name: step.name,
            condition: step.condition,
            retry_policy: step.retry_policy,
            timeout_ms: step.timeout_ms,
        }
    }
}

/// The kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    ToolCall,
    AiDecision,
    Condition,
    Parallel,
    Wait,
    Transform,
    HttpRequest,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::ToolCall => "tool_call",
            StepType::AiDecision => "ai_decision",
            StepType::Condition => "condition",
            StepType::Parallel => "parallel",
            StepType::Wait => "wait",
            StepType::Transform => "transform",
            StepType::HttpRequest => "http_request",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step configuration
// ---------------------------------------------------------------------------

/// Step-specific configuration, one variant per [`StepType`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    ToolCall(ToolCallConfig),
    AiDecision(AiDecisionConfig),
    Condition(ConditionConfig),
    Parallel(ParallelConfig),
    Wait(WaitConfig),
    Transform(TransformConfig),
    HttpRequest(HttpRequestConfig),
}

impl StepConfig {
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::ToolCall(_) => StepType::ToolCall,
            StepConfig::AiDecision(_) => StepType::AiDecision,
            StepConfig::Condition(_) => StepType::Condition,
            StepConfig::Parallel(_) => StepType::Parallel,
            StepConfig::Wait(_) => StepType::Wait,
            StepConfig::Transform(_) => StepType::Transform,
            StepConfig::HttpRequest(_) => StepType::HttpRequest,
        }
    }

    /// Decode an untyped config object for the given step type.
    ///
    /// A missing (`null`) config is treated as an empty object, which is
    /// valid for step types whose fields are all optional.
    pub fn from_parts(step_type: StepType, config: Value) -> Result<Self, serde_json::Error> {
        let config = match config {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Ok(match step_type {
            StepType::ToolCall => StepConfig::ToolCall(serde_json::from_value(config)?),
            StepType::AiDecision => StepConfig::AiDecision(serde_json::from_value(config)?),
            StepType::Condition => StepConfig::Condition(serde_json::from_value(config)?),
            StepType::Parallel => StepConfig::Parallel(serde_json::from_value(config)?),
            StepType::Wait => StepConfig::Wait(serde_json::from_value(config)?),
            StepType::Transform => StepConfig::Transform(serde_json::from_value(config)?),
            StepType::HttpRequest => StepConfig::HttpRequest(serde_json::from_value(config)?),
        })
    }

    /// Serialize the config body (without the type tag).
    pub fn to_value(&self) -> Value {
        let encoded = match self {
            StepConfig::ToolCall(c) => serde_json::to_value(c),
            StepConfig::AiDecision(c) => serde_json::to_value(c),
            StepConfig::Condition(c) => serde_json::to_value(c),
            StepConfig::Parallel(c) => serde_json::to_value(c),
            StepConfig::Wait(c) => serde_json::to_value(c),
            StepConfig::Transform(c) => serde_json::to_value(c),
            StepConfig::HttpRequest(c) => serde_json::to_value(c),
        };
        encoded.unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Invoke a tool on an upstream tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallConfig {
    pub server: String,
    pub tool: String,
    /// String-valued arguments are interpolated before the call.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallConfig {
    /// `<server>.<tool>` addressing form.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.server, self.tool)
    }
}

/// Ask the text-generation backend for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDecisionConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub output_format: AiOutputFormat,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

/// How an AI decision response is parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiOutputFormat {
    #[default]
    Text,
    Json,
    Boolean,
}

/// Evaluate a boolean expression and record the selected branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub expression: String,
    pub then_steps: Vec<String>,
    #[serde(default)]
    pub else_steps: Vec<String>,
}

/// Describe parallel branches. Branch steps are not dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub branches: Vec<Vec<String>>,
    #[serde(default)]
    pub wait_for: ParallelWaitStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelWaitStrategy {
    #[default]
    All,
    Any,
    None,
}

impl ParallelWaitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParallelWaitStrategy::All => "all",
            ParallelWaitStrategy::Any => "any",
            ParallelWaitStrategy::None => "none",
        }
    }
}

/// Suspend the run for a fixed duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Accepted for compatibility; not interpreted by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

/// Evaluate an expression into a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub expression: String,
    pub output_key: String,
}

/// Issue an HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Total dispatches allowed: the first attempt plus `max_retries`.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay in milliseconds before the given attempt (0-based).
    ///
    /// Attempt 0 never waits. Attempt `n > 0` waits
    /// `min(initial_delay × multiplier^(n-1), max_delay)`.
    pub fn delay_before_attempt_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        if capped.is_nan() || capped <= 0.0 {
            0
        } else {
            capped as u64
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
