//! Per-execution mutable state.
//!
//! `ExecutionContext` is owned by a single run task for the lifetime of one
//! execution. Step outputs are append-only; variables are seeded from the
//! definition and mutated by transform steps.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Live state used for expression evaluation during a run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    /// The triggering payload. Never mutated.
    pub inputs: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
    pub step_outputs: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: Uuid,
        workflow_id: Uuid,
        user_id: impl Into<String>,
        inputs: HashMap<String, Value>,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            user_id: user_id.into(),
            inputs,
            variables,
            step_outputs: HashMap::new(),
        }
    }

    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        self.step_outputs.insert(step_id.to_string(), output);
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Resolve a dotted path such as `inputs.user.name` or `steps.fetch.items.0`.
    ///
    /// Roots are `inputs`, `steps`, and `variables`. Object keys and numeric
    /// array indices are traversed; any missing segment yields `None`. A bare
    /// `inputs` resolves to the whole input object.
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.trim().split('.').map(str::trim);
        let root = segments.next()?;

        let start = match root {
            "inputs" => match segments.next() {
                Some(key) => self.inputs.get(key)?.clone(),
                None => Value::Object(
                    self.inputs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<Map<String, Value>>(),
                ),
            },
            "steps" => self.step_outputs.get(segments.next()?)?.clone(),
            "variables" => self.variables.get(segments.next()?)?.clone(),
            _ => return None,
        };

        let mut current = &start;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// `{"variables": {...}, "step_outputs": {...}}` for the execution record.
    pub fn snapshot(&self) -> Value {
        json!({
            "variables": self.variables,
            "step_outputs": self.step_outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        let inputs = HashMap::from([
            ("name".to_string(), json!("Ada")),
            ("user".to_string(), json!({ "address": { "city": "London" } })),
        ]);
        let variables = HashMap::from([("limit".to_string(), json!(3))]);
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), Uuid::now_v7(), "u1", inputs, variables);
        ctx.set_step_output("fetch", json!({ "items": [{ "id": 7 }, { "id": 9 }] }));
        ctx
    }

    #[test]
    fn resolves_nested_inputs() {
        let ctx = context();
        assert_eq!(ctx.resolve_path("inputs.user.address.city"), Some(json!("London")));
        assert_eq!(ctx.resolve_path("inputs.user.missing"), None);
    }

    #[test]
    fn resolves_step_output_array_index() {
        let ctx = context();
        assert_eq!(ctx.resolve_path("steps.fetch.items.1.id"), Some(json!(9)));
        assert_eq!(ctx.resolve_path("steps.fetch.items.5"), None);
        assert_eq!(ctx.resolve_path("steps.fetch.items.x"), None);
    }

    #[test]
    fn bare_inputs_resolves_whole_object() {
        let ctx = context();
        let all = ctx.resolve_path("inputs").unwrap();
        assert_eq!(all["name"], "Ada");
    }

    #[test]
    fn unknown_root_and_bare_steps_are_unresolved() {
        let ctx = context();
        assert_eq!(ctx.resolve_path("env.HOME"), None);
        assert_eq!(ctx.resolve_path("steps"), None);
        assert_eq!(ctx.resolve_path("variables"), None);
    }

    #[test]
    fn snapshot_contains_variables_and_outputs() {
        let mut ctx = context();
        ctx.set_variable("greeting", json!("hi"));
        let snap = ctx.snapshot();
        assert_eq!(snap["variables"]["greeting"], "hi");
        assert_eq!(snap["variables"]["limit"], 3);
        assert_eq!(snap["step_outputs"]["fetch"]["items"][0]["id"], 7);
    }
}
