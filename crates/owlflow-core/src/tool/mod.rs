//! Tool invocation port.
//!
//! The engine sees upstream tool servers only through [`ToolRouter`]. A
//! router never fails for ordinary tool-level errors; those come back as a
//! [`ToolCallResult`] with `is_error` set.

pub mod registry;

use std::future::Future;
use std::pin::Pin;

use owlflow_types::tool::ToolCallResult;
use serde_json::{Map, Value};

pub use registry::ToolRegistry;

/// Routes a tool call to the server that owns the tool.
///
/// Object-safe (boxed futures) so the step executor can hold an
/// `Arc<dyn ToolRouter>`. Must be safe to call concurrently from unrelated
/// executions.
pub trait ToolRouter: Send + Sync {
    fn call_tool<'a>(
        &'a self,
        server: &'a str,
        tool: &'a str,
        arguments: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = ToolCallResult> + Send + 'a>>;
}
