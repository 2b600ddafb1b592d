//! Service schema: one POST operation per registered flow.

use flowllm::Dispatcher;
use serde_json::{json, Value};

pub(crate) fn openapi_document(dispatcher: &Dispatcher) -> Value {
    let mut paths = serde_json::Map::new();
    for flow in dispatcher.flows() {
        let request_schema = flow
            .input_json_schema()
            .unwrap_or_else(|| json!({"type": "object"}));
        let response_content = if flow.stream() {
            json!({"text/event-stream": {}})
        } else {
            json!({"application/json": {"schema": {"type": "object"}}})
        };
        paths.insert(
            format!("/{}", flow.name()),
            json!({
                "post": {
                    "operationId": flow.name(),
                    "summary": flow.description().unwrap_or(flow.name()),
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {"schema": request_schema}}
                    },
                    "responses": {
                        "200": {"description": "flow response", "content": response_content}
                    }
                }
            }),
        );
    }
    json!({
        "openapi": "3.1.0",
        "info": {"title": "flowllm", "version": env!("CARGO_PKG_VERSION")},
        "paths": paths,
    })
}
