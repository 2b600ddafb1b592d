//! Flows: named, composed op trees exposed by the service.

pub mod dispatcher;
pub mod parser;

pub use dispatcher::{Dispatcher, InvokeMode};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use config::{FlowConfig, ParamConfig};

use crate::error::FlowError;
use crate::op::tool_call::{json_schema_for, ParamAttrs, ParamType};
use crate::op::Op;

/// One service-facing flow: a name, the composed op tree, and metadata.
/// Built once at startup, immutable thereafter, invoked concurrently.
#[derive(Debug)]
pub struct Flow {
    name: String,
    op: Arc<dyn Op>,
    description: Option<String>,
    input_schema: Option<BTreeMap<String, ParamAttrs>>,
    stream: bool,
    expr: String,
}

impl Flow {
    /// Parses the flow's expression and captures its metadata.
    pub fn from_config(name: &str, config: &FlowConfig) -> Result<Self, FlowError> {
        let op = parser::parse_flow(&config.flow_content)?;
        let expr = op.to_expr();
        Ok(Self {
            name: name.to_string(),
            op: Arc::from(op),
            description: config.description.clone(),
            input_schema: config.input_schema.as_ref().map(convert_schema),
            stream: config.stream,
            expr,
        })
    }

    /// Wraps an already-composed op (programmatic flows, tests).
    pub fn new(name: &str, op: Box<dyn Op>) -> Self {
        let expr = op.to_expr();
        Self {
            name: name.to_string(),
            op: Arc::from(op),
            description: None,
            input_schema: None,
            stream: false,
            expr,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: BTreeMap<String, ParamAttrs>) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &Arc<dyn Op> {
        &self.op
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn input_schema(&self) -> Option<&BTreeMap<String, ParamAttrs>> {
        self.input_schema.as_ref()
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    /// The canonical expression of the composed tree.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// JSON schema of the declared inputs, when a schema is declared.
    pub fn input_json_schema(&self) -> Option<Value> {
        self.input_schema.as_ref().map(|s| json_schema_for(s))
    }
}

/// Converts config-level parameter declarations into schema attributes.
fn convert_schema(params: &BTreeMap<String, ParamConfig>) -> BTreeMap<String, ParamAttrs> {
    params
        .iter()
        .map(|(name, param)| {
            (
                name.clone(),
                ParamAttrs {
                    param_type: ParamType::parse(&param.param_type).unwrap_or_default(),
                    description: param.description.clone(),
                    required: param.required,
                    default: param.default.clone(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::demo::register_demo_ops;

    #[test]
    fn flow_from_config_parses_and_keeps_metadata() {
        register_demo_ops();
        let mut schema = BTreeMap::new();
        schema.insert(
            "text".to_string(),
            ParamConfig {
                param_type: "string".into(),
                description: "input text".into(),
                required: true,
                default: None,
            },
        );
        let config = FlowConfig {
            flow_content: "EchoOp()".into(),
            description: Some("echoes".into()),
            stream: false,
            input_schema: Some(schema),
        };
        let flow = Flow::from_config("demo_echo", &config).unwrap();
        assert_eq!(flow.name(), "demo_echo");
        assert_eq!(flow.expr(), "EchoOp()");
        assert_eq!(flow.description(), Some("echoes"));
        let json = flow.input_json_schema().unwrap();
        assert_eq!(json["properties"]["text"]["type"], "string");
        assert_eq!(json["required"][0], "text");
    }

    #[test]
    fn bad_expression_fails_flow_construction() {
        register_demo_ops();
        let config = FlowConfig {
            flow_content: "NotRegistered()".into(),
            ..Default::default()
        };
        let err = Flow::from_config("broken", &config).unwrap_err();
        assert!(matches!(err, FlowError::Parse(_)));
    }
}
