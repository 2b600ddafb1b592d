//! MCP service for FlowLLM: an SSE MCP server with one tool per flow.
//!
//! Tool name = flow name; `description` and `input_schema` come from the
//! flow's declarations. A flow without an input schema cannot be called in
//! strict MCP mode and is not listed; stream flows are not exposed either
//! (MCP tool responses are not streamed). Tool failures surface as
//! `is_error` results with the message as a text content part. `THINK`
//! chunks never reach MCP clients.

mod server;

pub use server::{execute_tool, tool_table, FlowToolServer};

use std::sync::Arc;

use flowllm::Dispatcher;
use rmcp::transport::sse_server::SseServer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpServeError {
    #[error("unsupported mcp transport `{0}` (only sse)")]
    UnsupportedTransport(String),
    #[error("bad mcp listen address `{addr}`: {message}")]
    Address { addr: String, message: String },
    #[error("mcp transport: {0}")]
    Transport(std::io::Error),
}

/// Binds the configured SSE address and serves tools until ctrl-c.
pub async fn run_mcp_service(dispatcher: Arc<Dispatcher>) -> Result<(), McpServeError> {
    let mcp_config = &dispatcher.service().config().mcp;
    if mcp_config.transport != "sse" {
        return Err(McpServeError::UnsupportedTransport(
            mcp_config.transport.clone(),
        ));
    }
    let addr = format!("{}:{}", mcp_config.host, mcp_config.port);
    let socket_addr = addr.parse().map_err(|e| McpServeError::Address {
        addr: addr.clone(),
        message: format!("{e}"),
    })?;

    let sse = SseServer::serve(socket_addr)
        .await
        .map_err(McpServeError::Transport)?;
    tracing::info!(addr = %addr, "mcp service listening");

    let handler_dispatcher = dispatcher.clone();
    let cancel = sse.with_service(move || FlowToolServer::new(handler_dispatcher.clone()));

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    cancel.cancel();
    Ok(())
}
