//! `${...}` placeholder interpolation.
//!
//! Paths are resolved against an [`ExecutionContext`] (see
//! [`ExecutionContext::resolve_path`]). Evaluation is pure and never fails:
//! anything that does not resolve is substituted with an empty string.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::context::ExecutionContext;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

/// Stateless evaluator for placeholder expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Replace every `${path}` with the stringified resolved value.
    ///
    /// Strings are inserted without quotes, numbers and booleans in their
    /// JSON form, objects and arrays as compact JSON, and null or unresolved
    /// paths as the empty string.
    pub fn evaluate(&self, expression: &str, ctx: &ExecutionContext) -> String {
        PLACEHOLDER
            .replace_all(expression, |caps: &Captures<'_>| {
                ctx.resolve_path(&caps[1])
                    .map(|v| stringify(&v))
                    .unwrap_or_default()
            })
            .into_owned()
    }

    /// Evaluate and normalize to a boolean.
    ///
    /// `true`/`1`/`yes` are true and `false`/`0`/`no`/empty are false
    /// (case-insensitive); any other non-blank text is true.
    pub fn evaluate_condition(&self, expression: &str, ctx: &ExecutionContext) -> bool {
        let evaluated = self.evaluate(expression, ctx);
        match evaluated.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" | "" => false,
            _ => !evaluated.trim().is_empty(),
        }
    }

    /// Evaluate, then re-parse the result as JSON, falling back to a string.
    pub fn evaluate_to_value(&self, expression: &str, ctx: &ExecutionContext) -> Value {
        let evaluated = self.evaluate(expression, ctx);
        serde_json::from_str(&evaluated).unwrap_or(Value::String(evaluated))
    }

    /// Interpolate top-level string arguments; other values pass through.
    pub fn evaluate_arguments(
        &self,
        arguments: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Map<String, Value> {
        arguments
            .iter()
            .map(|(key, value)| {
                let evaluated = match value {
                    Value::String(s) => Value::String(self.evaluate(s, ctx)),
                    other => other.clone(),
                };
                (key.clone(), evaluated)
            })
            .collect()
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
