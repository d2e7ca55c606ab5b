//! Workflow definition parsing, validation, and file loading.
//!
//! Definitions are accepted as JSON or YAML. Content whose first non-blank
//! character is `{` is treated as JSON, anything else as YAML.

use std::collections::HashSet;
use std::path::Path;

use owlflow_types::error::WorkflowError;
use owlflow_types::workflow::{StepConfig, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse JSON or YAML, detected from the content.
pub fn parse_workflow(content: &str) -> Result<WorkflowDefinition, WorkflowError> {
    if content.trim_start().starts_with('{') {
        parse_workflow_json(content)
    } else {
        parse_workflow_yaml(content)
    }
}

pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))
}

pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))
}

/// Pretty-printed JSON.
pub fn to_json(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_json::to_string_pretty(def).map_err(|e| WorkflowError::Serialize(e.to_string()))
}

pub fn to_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::Serialize(e.to_string()))
}

/// Read and parse a definition file (JSON or YAML).
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path).map_err(|e| WorkflowError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_workflow(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Collects every problem instead of stopping at the first. Checks:
/// - name is non-blank
/// - step IDs are non-blank and unique
/// - condition `then_steps`/`else_steps` and parallel branches reference
///   existing step IDs
/// - `timeout_ms > 0` when set
/// - retry policy `backoff_multiplier >= 1.0` and `initial_delay_ms <= max_delay_ms`
///
/// A definition with no steps is valid.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    let mut problems = Vec::new();

    if def.name.trim().is_empty() {
        problems.push("workflow name must not be empty".to_string());
    }

    let mut seen_ids = HashSet::new();
    for (index, step) in def.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            problems.push(format!("step #{index} has an empty id"));
        } else if !seen_ids.insert(step.id.as_str()) {
            problems.push(format!("duplicate step id '{}'", step.id));
        }
    }

    for step in &def.steps {
        let references: Vec<&String> = match &step.config {
            StepConfig::Condition(c) => c.then_steps.iter().chain(c.else_steps.iter()).collect(),
            StepConfig::Parallel(p) => p.branches.iter().flatten().collect(),
            _ => Vec::new(),
        };
        for target in references {
            if !seen_ids.contains(target.as_str()) {
                problems.push(format!(
                    "{} step '{}' references unknown step '{}'",
                    step.step_type(),
                    step.id,
                    target
                ));
            }
        }

        if step.timeout_ms == Some(0) {
            problems.push(format!("step '{}' timeout_ms must be > 0", step.id));
        }

        if let Some(policy) = &step.retry_policy {
            if policy.backoff_multiplier.is_nan() || policy.backoff_multiplier < 1.0 {
                problems.push(format!(
                    "step '{}' backoff_multiplier must be >= 1.0",
                    step.id
                ));
            }
            if policy.initial_delay_ms > policy.max_delay_ms {
                problems.push(format!(
                    "step '{}' initial_delay_ms must not exceed max_delay_ms",
                    step.id
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::Invalid(problems))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
