//! Application state wiring the engine to its adapters.
//!
//! The engine is generic over its stores; AppState pins it to the in-memory
//! implementations and plugs in the Ollama generator and reqwest HTTP client.

use std::path::Path;
use std::sync::Arc;

use owlflow_core::event::EventBus;
use owlflow_core::llm::BoxTextGenerator;
use owlflow_core::workflow::ai_decision::AiDecisionAdapter;
use owlflow_core::workflow::{StepExecutor, WorkflowEngine};
use owlflow_infra::config::load_effective_config;
use owlflow_infra::http::ReqwestHttpClient;
use owlflow_infra::llm::OllamaGenerator;
use owlflow_infra::memory::{InMemoryExecutionRepository, InMemoryStepRepository};
use owlflow_types::config::OwlflowConfig;

/// The engine pinned to the in-memory stores.
pub type ConcreteEngine = WorkflowEngine<InMemoryExecutionRepository, InMemoryStepRepository>;

/// Shared application state.
pub struct AppState {
    pub config: OwlflowConfig,
    pub engine: Arc<ConcreteEngine>,
    /// Same store the engine writes step records to.
    pub steps: Arc<InMemoryStepRepository>,
    pub ai_decision: Arc<AiDecisionAdapter>,
}

impl AppState {
    /// Load config and wire the engine.
    ///
    /// No tool router is installed: tool_call steps fail with
    /// "tool router not configured".
    pub async fn init(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = load_effective_config(config_path).await;
        tracing::debug!(
            ollama = %config.ollama.base_url,
            model = %config.ollama.model,
            "configuration loaded"
        );

        let executions = Arc::new(InMemoryExecutionRepository::new());
        let steps = Arc::new(InMemoryStepRepository::new());

        let generator = BoxTextGenerator::new(OllamaGenerator::new(&config.ollama));
        let ai_decision = Arc::new(AiDecisionAdapter::new(generator));

        let executor = StepExecutor::new()
            .with_ai_decision(Arc::clone(&ai_decision))
            .with_http_client(Arc::new(ReqwestHttpClient::new(&config.http)))
            .with_default_timeout_ms(config.engine.default_step_timeout_ms);

        let engine = WorkflowEngine::new(
            executions,
            Arc::clone(&steps),
            executor,
            EventBus::new(config.engine.event_capacity),
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
            steps,
            ai_decision,
        })
    }
}
