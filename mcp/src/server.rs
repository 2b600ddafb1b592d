//! The MCP server handler: flow table to tool table, tool calls to flow
//! invocations.

use std::borrow::Cow;
use std::sync::Arc;

use flowllm::{Dispatcher, InvokeMode, OpArgs};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    ProtocolVersion, ServerCapabilities, ServerInfo, Tool as McpTool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler};

/// MCP handler over the shared flow dispatcher.
#[derive(Clone)]
pub struct FlowToolServer {
    dispatcher: Arc<Dispatcher>,
}

impl FlowToolServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// Builds the tool table: one tool per non-stream flow with a declared input
/// schema. Stream flows and schema-less flows are skipped with a warning.
pub fn tool_table(dispatcher: &Dispatcher) -> Vec<McpTool> {
    let mut tools = Vec::new();
    for flow in dispatcher.flows() {
        if flow.stream() {
            tracing::warn!(flow = %flow.name(), "stream flow not exposed over mcp");
            continue;
        }
        let Some(schema) = flow.input_json_schema() else {
            tracing::warn!(flow = %flow.name(), "flow without input schema not exposed over mcp");
            continue;
        };
        let schema_obj = schema.as_object().cloned().unwrap_or_default();
        tools.push(McpTool {
            name: Cow::Owned(flow.name().to_string()),
            title: None,
            description: Some(Cow::Owned(
                flow.description().unwrap_or(flow.name()).to_string(),
            )),
            input_schema: Arc::new(schema_obj),
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        });
    }
    tools
}

/// Runs one tool call through the dispatcher in strict MCP mode.
///
/// Success: `response.answer` as a text content part, with any extra
/// response fields as structured content. Failure: an `is_error` result
/// carrying the message.
pub async fn execute_tool(
    dispatcher: &Dispatcher,
    name: &str,
    arguments: OpArgs,
) -> CallToolResult {
    match dispatcher.execute(name, arguments, InvokeMode::Mcp).await {
        Ok(response) => {
            let mut result = CallToolResult::success(vec![Content::text(response.answer.clone())]);
            if !response.extra.is_empty() {
                result.structured_content =
                    Some(serde_json::Value::Object(response.extra.clone()));
            }
            result
        }
        Err(err) => {
            tracing::warn!(tool = %name, error = %err, "tool call failed");
            CallToolResult::error(vec![Content::text(err.to_string())])
        }
    }
}

impl ServerHandler for FlowToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "flowllm".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: None,
        }
    }

    async fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(tool_table(&self.dispatcher)))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = request.arguments.unwrap_or_default();
        Ok(execute_tool(&self.dispatcher, &request.name, arguments).await)
    }
}
