//! ReqwestHttpClient -- [`HttpClient`] implementation on top of `reqwest`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use owlflow_core::http::{HttpClient, HttpError, HttpRequest, HttpResponse};
use owlflow_types::config::HttpSettings;

/// HTTP client for workflow steps.
///
/// The timeout applies to the whole request, including reading the body.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(settings: &HttpSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .build()
            .expect("failed to create reqwest client");
        Self { client }
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let method: reqwest::Method = request
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| HttpError::InvalidMethod(request.method.clone()))?;

        let mut builder = self.client.request(method.clone(), &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            // `json` also sets Content-Type: application/json.
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| HttpError::Request {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Body(e.to_string()))?;

        tracing::info!(
            method = %method,
            url = request.url.as_str(),
            status,
            body_len = body.len(),
            "HTTP step request completed"
        );

        Ok(HttpResponse { status, body })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(&HttpSettings::default())
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}
