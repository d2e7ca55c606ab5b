//! OllamaGenerator -- [`TextGenerator`] backed by a local Ollama server.
//!
//! Uses the non-streaming `/api/generate` and `/api/chat` endpoints and
//! `/api/tags` as a liveness probe.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use owlflow_core::llm::TextGenerator;
use owlflow_types::config::OllamaSettings;
use owlflow_types::llm::{ChatMessage, GenerateRequest, LlmError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct OllamaOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

// ---------------------------------------------------------------------------
// OllamaGenerator
// ---------------------------------------------------------------------------

/// Ollama text generator.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(settings: &OllamaSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        }
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Multi-turn chat completion. Returns the assistant message content.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };
        let response: OllamaChatResponse = self.post_json("/api/chat", &body).await?;
        Ok(response.message.content)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))
    }
}

impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = OllamaGenerateRequest {
            model,
            prompt: &request.prompt,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        tracing::debug!(model, prompt_len = request.prompt.len(), "ollama generate");
        let response: OllamaGenerateResponse = self.post_json("/api/generate", &body).await?;
        Ok(response.response)
    }

    async fn is_available(&self) -> bool {
        match self.client.get(self.url("/api/tags")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "ollama not reachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> OllamaGenerator {
        OllamaGenerator::new(&OllamaSettings {
            base_url: format!("{}/", server.uri()),
            model: "llama3.2".to_string(),
            timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn test_generate_sends_options_and_returns_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({
                "model": "llama3.2",
                "prompt": "Is the sky blue?",
                "stream": false,
                "options": { "temperature": 0.2, "num_predict": 50 }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "yes", "done": true })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut request = GenerateRequest::new("Is the sky blue?");
        request.temperature = 0.2;
        request.max_tokens = 50;

        let text = generator(&server).generate(&request).await.unwrap();
        assert_eq!(text, "yes");
    }

    #[tokio::test]
    async fn test_generate_honors_request_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({
                "model": "qwen2.5",
                "prompt": "hi",
                "stream": false,
                "options": { "temperature": 0.7, "num_predict": 1000 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "hello" })))
            .mount(&server)
            .await;

        let mut request = GenerateRequest::new("hi");
        request.model = Some("qwen2.5".to_string());
        assert_eq!(generator(&server).generate(&request).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_generate_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate(&GenerateRequest::new("hi"))
            .await
            .unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate(&GenerateRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_chat_returns_assistant_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_json(json!({
                "model": "llama3.2",
                "messages": [
                    { "role": "system", "content": "Be brief." },
                    { "role": "user", "content": "Ping?" }
                ],
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": { "role": "assistant", "content": "Pong." },
                "done": true
            })))
            .mount(&server)
            .await;

        let messages = vec![ChatMessage::system("Be brief."), ChatMessage::user("Ping?")];
        let reply = generator(&server).chat(&messages).await.unwrap();
        assert_eq!(reply, "Pong.");
    }

    #[tokio::test]
    async fn test_is_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
            .mount(&server)
            .await;
        assert!(generator(&server).is_available().await);

        let unreachable = OllamaGenerator::new(&OllamaSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            ..OllamaSettings::default()
        });
        assert!(!unreachable.is_available().await);
        assert_eq!(unreachable.name(), "ollama");
        assert_eq!(unreachable.model(), "llama3.2");
    }
}
