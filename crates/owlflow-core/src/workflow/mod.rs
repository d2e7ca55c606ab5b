//! Workflow engine core: definition loading, step execution, and run control.
//!
//! - `definition` -- JSON/YAML parsing, validation, file loading
//! - `context` -- Per-run state with `inputs`/`steps`/`variables` path lookup
//! - `expression` -- `${...}` placeholder interpolation
//! - `ai_decision` -- Prompt construction and response parsing for AI steps
//! - `step_executor` -- Dispatch for all seven step types
//! - `retry` -- Exponential-backoff retry around a single step
//! - `lifecycle` -- Explicit execution state machine with observers
//! - `engine` -- Spawns runs, walks steps, handles cancellation

pub mod ai_decision;
pub mod context;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod lifecycle;
pub mod retry;
pub mod step_executor;

#[cfg(test)]
pub(crate) mod testing;

pub use context::ExecutionContext;
pub use engine::{EngineError, WorkflowEngine};
pub use expression::ExpressionEvaluator;
pub use step_executor::{StepExecutor, StepResult};
