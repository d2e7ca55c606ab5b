//! AI decision adapter.
//!
//! Builds a prompt for the requested output format, asks the text generator,
//! and parses the reply into a JSON value. Generation errors are returned as
//! [`AiDecisionError`]; parsing never fails.

use owlflow_types::llm::{GenerateRequest, LlmError};
use owlflow_types::workflow::{AiDecisionConfig, AiOutputFormat};
use serde_json::Value;

use crate::llm::BoxTextGenerator;

use super::context::ExecutionContext;
use super::expression::ExpressionEvaluator;

const JSON_INSTRUCTION: &str =
    "IMPORTANT: Respond with valid JSON only. No explanation or markdown, just the JSON object.";
const BOOLEAN_INSTRUCTION: &str = "IMPORTANT: Respond with only \"true\" or \"false\". No other text.";

/// A parsed decision plus the raw model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct AiDecision {
    pub output: Value,
    pub raw_response: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AiDecisionError {
    #[error("AI decision failed: {0}")]
    Generation(#[from] LlmError),
}

/// Turns `ai_decision` step configs into typed decisions.
#[derive(Debug)]
pub struct AiDecisionAdapter {
    generator: BoxTextGenerator,
    evaluator: ExpressionEvaluator,
}

impl AiDecisionAdapter {
    pub fn new(generator: BoxTextGenerator) -> Self {
        Self {
            generator,
            evaluator: ExpressionEvaluator::new(),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.generator.is_available().await
    }

    pub async fn make_decision(
        &self,
        config: &AiDecisionConfig,
        ctx: &ExecutionContext,
    ) -> Result<AiDecision, AiDecisionError> {
        let prompt = self.evaluator.evaluate(&config.prompt, ctx);
        tracing::debug!(
            generator = self.generator.name(),
            format = ?config.output_format,
            prompt_len = prompt.len(),
            "requesting AI decision"
        );

        let request = GenerateRequest {
            prompt: build_prompt(&prompt, config.output_format),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        let raw_response = self.generator.generate(&request).await.map_err(|e| {
            tracing::warn!(error = %e, "AI generation failed");
            AiDecisionError::Generation(e)
        })?;

        Ok(AiDecision {
            output: parse_response(&raw_response, config.output_format),
            raw_response,
        })
    }
}

/// Append the format instruction. Text prompts are sent unchanged.
pub fn build_prompt(prompt: &str, format: AiOutputFormat) -> String {
    match format {
        AiOutputFormat::Text => prompt.to_string(),
        AiOutputFormat::Json => format!("{prompt}\n\n{JSON_INSTRUCTION}"),
        AiOutputFormat::Boolean => format!("{prompt}\n\n{BOOLEAN_INSTRUCTION}"),
    }
}

/// Parse a model reply according to the output format.
///
/// Boolean replies are matched by substring in the order `true`, `yes`,
/// `false`, `no`, so a reply mentioning both "true" and "false" is true.
pub fn parse_response(response: &str, format: AiOutputFormat) -> Value {
    let cleaned = response.trim();
    match format {
        AiOutputFormat::Text => Value::String(cleaned.to_string()),
        AiOutputFormat::Json => parse_json_reply(cleaned),
        AiOutputFormat::Boolean => {
            let lower = cleaned.to_lowercase();
            let decision = if lower.contains("true") || lower.contains("yes") {
                true
            } else if lower.contains("false") || lower.contains("no") {
                false
            } else {
                !cleaned.is_empty()
            };
            Value::Bool(decision)
        }
    }
}

fn parse_json_reply(cleaned: &str) -> Value {
    let span = bracketed(cleaned, '{', '}').or_else(|| bracketed(cleaned, '[', ']'));
    match span {
        Some(candidate) => serde_json::from_str(candidate).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "AI reply is not valid JSON, keeping raw text");
            Value::String(cleaned.to_string())
        }),
        None => Value::String(cleaned.to_string()),
    }
}

/// Slice from the first `open` to the last `close`, inclusive.
fn bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
