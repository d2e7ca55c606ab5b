//! TextGenerator trait definition.

use owlflow_types::llm::{GenerateRequest, LlmError};

/// Trait for text-generation backends (Ollama, ...).
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). Implementations
/// live in owlflow-infra (e.g., `OllamaGenerator`).
pub trait TextGenerator: Send + Sync {
    /// Human-readable backend name (e.g., "ollama").
    fn name(&self) -> &str;

    /// Generate a single completion for the request.
    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send;

    /// Whether the backend currently answers. Never errors.
    fn is_available(&self) -> impl std::future::Future<Output = bool> + Send;
}
