//! Jules MCP server: exposes every Jules API operation as an MCP tool over stdio.

pub mod cli;
pub mod error;
pub mod handler;
pub mod logging;

use crate::cli::Cli;
use crate::error::{Result, ServerError};
use crate::handler::JulesMcpServer;
use jules_openapi_tools::{ReqwestTransport, ToolRegistry, load_document};
use rmcp::ServiceExt as _;
use std::sync::Arc;

/// The Jules `OpenAPI` document compiled into the binary.
pub const EMBEDDED_SPEC: &str = include_str!("../openapi/jules.json");

/// Build the registry and serve MCP on stdin/stdout until the client goes away.
///
/// The HTTP client lives inside the registry, so it is released when this function
/// returns, on success and on every error path.
///
/// # Errors
///
/// Returns a [`ServerError`] when configuration is invalid, the document cannot be
/// indexed, or the MCP session fails.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.client_config()?;
    let doc = load_document(&cli.spec_source(), cli.spec_pin().as_ref())?;

    let transport = Arc::new(ReqwestTransport::new(&config)?);
    tracing::info!(base_url = %transport.base_url(), "upstream configured");

    let registry = ToolRegistry::from_document(&doc, transport)?;
    drop(doc);

    let service = JulesMcpServer::new(Arc::new(registry))
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    let reason = service
        .waiting()
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;
    tracing::info!(reason = ?reason, "MCP session ended");
    Ok(())
}
