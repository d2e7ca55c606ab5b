//! In-process tool registry.
//!
//! Tools are registered under their qualified name `<server>.<tool>`. The
//! registry also tracks whether each server is connected so a disconnected
//! server is reported distinctly from an unknown tool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use owlflow_types::tool::ToolCallResult;
use serde_json::{Map, Value};

use super::ToolRouter;

/// Async tool handler. An `Err` is reported as `"Tool call failed: <message>"`.
pub type ToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<ToolCallResult, String>> + Send + Sync>;

/// Concurrent map of qualified tool names to handlers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, ToolHandler>,
    /// Connection state per server name.
    servers: DashMap<String, bool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<server>.<tool>`.
    pub fn qualified_name(server: &str, tool: &str) -> String {
        format!("{server}.{tool}")
    }

    /// Register a handler. The owning server is marked connected.
    pub fn register<F, Fut>(&self, server: &str, tool: &str, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolCallResult, String>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.tools
            .insert(Self::qualified_name(server, tool), handler);
        self.servers.insert(server.to_string(), true);
        tracing::debug!(server, tool, "registered tool");
    }

    /// Mark a server connected or disconnected. Its tools stay registered.
    pub fn set_connected(&self, server: &str, connected: bool) {
        self.servers.insert(server.to_string(), connected);
    }

    pub fn is_connected(&self, server: &str) -> bool {
        self.servers.get(server).map(|c| *c).unwrap_or(false)
    }

    /// Registered qualified names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Dispatch by qualified name (`<server>.<tool>`).
    pub async fn call_qualified(
        &self,
        qualified: &str,
        arguments: Map<String, Value>,
    ) -> ToolCallResult {
        match qualified.split_once('.') {
            Some((server, tool)) => self.dispatch(server, tool, arguments).await,
            None => ToolCallResult::error(format!("Tool not found: {qualified}")),
        }
    }

    async fn dispatch(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> ToolCallResult {
        let qualified = Self::qualified_name(server, tool);
        // Clone the handler out so no map guard is held across the await.
        let handler = match self.tools.get(&qualified) {
            Some(entry) => Arc::clone(entry.value()),
            None => return ToolCallResult::error(format!("Tool not found: {qualified}")),
        };
        if !self.is_connected(server) {
            return ToolCallResult::error(format!("Server not connected: {server}"));
        }

        match handler(arguments).await {
            Ok(result) => result,
            Err(message) => {
                tracing::warn!(tool = %qualified, error = %message, "tool call failed");
                ToolCallResult::error(format!("Tool call failed: {message}"))
            }
        }
    }
}

impl ToolRouter for ToolRegistry {
    fn call_tool<'a>(
        &'a self,
        server: &'a str,
        tool: &'a str,
        arguments: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = ToolCallResult> + Send + 'a>> {
        Box::pin(self.dispatch(server, tool, arguments))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}
