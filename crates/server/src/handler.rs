//! MCP surface: `tools/list` and `tools/call` backed by the tool registry.

use jules_openapi_tools::ToolRegistry;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ErrorCode, ErrorData, Implementation, JsonObject,
    ListToolsResult, PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const SERVER_NAME: &str = "Jules MCP Server";

/// JSON-RPC code for a request the client cancelled (`RequestCancelled`).
pub const REQUEST_CANCELLED: ErrorCode = ErrorCode(-32800);

#[derive(Debug, Clone)]
pub struct JulesMcpServer {
    registry: Arc<ToolRegistry>,
}

impl JulesMcpServer {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Invoke a tool unless `ct` fires first.
    ///
    /// On cancellation the invocation future is dropped, which aborts its HTTP request.
    ///
    /// # Errors
    ///
    /// Returns a [`REQUEST_CANCELLED`] error only when the call was cancelled; the client
    /// has already given up on the request, so it may never read it. Upstream and
    /// validation failures are tool results with `isError` set.
    pub async fn call(
        &self,
        name: &str,
        arguments: &JsonObject,
        ct: &CancellationToken,
    ) -> Result<CallToolResult, ErrorData> {
        tokio::select! {
            result = self.registry.invoke(name, arguments) => Ok(result.into_call_tool_result()),
            () = ct.cancelled() => {
                tracing::info!(
                    tool = %name,
                    "tool call cancelled by client; upstream request dropped, response may be discarded"
                );
                Err(ErrorData::new(
                    REQUEST_CANCELLED,
                    format!("tool call '{name}' was cancelled"),
                    None,
                ))
            }
        }
    }
}

impl ServerHandler for JulesMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            protocol_version: ProtocolVersion::LATEST,
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Tools map one-to-one onto Jules API operations. Start with listSources to find a \
                 source, createSession to start a task, then follow it with getSession and \
                 listActivities."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.registry.list_tools(),
            ..Default::default()
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let arguments = request.arguments.unwrap_or_default();
            self.call(&request.name, &arguments, &context.ct).await
        }
    }
}
