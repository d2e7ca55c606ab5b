//! HTTP capability port used by `http_request` steps.
//!
//! The trait is defined here; `ReqwestHttpClient` in owlflow-infra implements
//! it. A non-2xx status is a normal response, not an error.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

/// An outbound request with already-interpolated URL and headers.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Sent as JSON with `Content-Type: application/json` when present.
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// The body parsed as JSON, or the raw text as a JSON string.
    pub fn body_value(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}

/// Errors from the HTTP capability.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("HTTP request to '{url}' failed: {message}")]
    Request { url: String, message: String },

    #[error("failed to read HTTP response body: {0}")]
    Body(String),
}

/// Object-safe HTTP client.
pub trait HttpClient: Send + Sync {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + '_>>;
}
