//! Tool schema carried by tool ops: declared inputs/outputs, key mappings,
//! and the `tool_index` suffix for multi-instance disambiguation.
//!
//! Before execute, the runtime reads each declared input from the context
//! (mapping + suffix applied) into the op's input dict; after execute it
//! writes the declared outputs back. A missing required input fails the
//! invocation without retries.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::context::Context;
use crate::error::FlowError;
use crate::op::OpArgs;

/// JSON-schema style parameter type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" | "str" => Some(ParamType::String),
            "integer" | "int" => Some(ParamType::Integer),
            "number" | "float" => Some(ParamType::Number),
            "boolean" | "bool" => Some(ParamType::Boolean),
            "array" | "list" => Some(ParamType::Array),
            "object" | "dict" => Some(ParamType::Object),
            _ => None,
        }
    }

    /// Whether `value` satisfies this type. Integers satisfy `number`.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter.
#[derive(Clone, Debug, Default)]
pub struct ParamAttrs {
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamAttrs {
    pub fn required(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: true,
            ..Default::default()
        }
    }

    pub fn optional(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: false,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// The schema of one tool op.
#[derive(Clone, Debug, Default)]
pub struct ToolCall {
    pub description: String,
    pub input_schema: BTreeMap<String, ParamAttrs>,
    /// Absent means one implicit string output named `{op_short_name}_result`.
    pub output_schema: Option<BTreeMap<String, ParamAttrs>>,
    /// Renames schema keys to context keys on read.
    pub input_schema_mapping: BTreeMap<String, String>,
    /// Renames schema keys to context keys on write.
    pub output_schema_mapping: BTreeMap<String, String>,
    /// Multi-instance disambiguation: suffixes context keys as `{key}_{index}`.
    pub tool_index: Option<u32>,
}

impl ToolCall {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, attrs: ParamAttrs) -> Self {
        self.input_schema.insert(name.into(), attrs);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, attrs: ParamAttrs) -> Self {
        self.output_schema
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), attrs);
        self
    }

    pub fn with_input_mapping(
        mut self,
        schema_key: impl Into<String>,
        context_key: impl Into<String>,
    ) -> Self {
        self.input_schema_mapping
            .insert(schema_key.into(), context_key.into());
        self
    }

    pub fn with_output_mapping(
        mut self,
        schema_key: impl Into<String>,
        context_key: impl Into<String>,
    ) -> Self {
        self.output_schema_mapping
            .insert(schema_key.into(), context_key.into());
        self
    }

    pub fn with_tool_index(mut self, index: u32) -> Self {
        self.tool_index = Some(index);
        self
    }

    fn suffixed(&self, key: &str) -> String {
        match self.tool_index {
            Some(index) => format!("{key}_{index}"),
            None => key.to_string(),
        }
    }

    /// Context key a declared input is read from.
    pub fn input_context_key(&self, schema_key: &str) -> String {
        let mapped = self
            .input_schema_mapping
            .get(schema_key)
            .map(String::as_str)
            .unwrap_or(schema_key);
        self.suffixed(mapped)
    }

    /// Context key a declared output is written to.
    pub fn output_context_key(&self, schema_key: &str) -> String {
        let mapped = self
            .output_schema_mapping
            .get(schema_key)
            .map(String::as_str)
            .unwrap_or(schema_key);
        self.suffixed(mapped)
    }

    /// Effective output schema keys, defaulting to `{short_name}_result`.
    pub fn output_keys(&self, short_name: &str) -> Vec<String> {
        match &self.output_schema {
            Some(schema) => schema.keys().cloned().collect(),
            None => vec![format!("{short_name}_result")],
        }
    }

    /// Reads each declared input from the context into the op's input dict,
    /// keyed by schema name. Applies mappings, the `tool_index` suffix and
    /// declared defaults; a missing required input is a hard failure.
    pub fn bind_inputs(&self, ctx: &Context, op_name: &str) -> Result<OpArgs, FlowError> {
        let mut inputs = OpArgs::new();
        for (schema_key, attrs) in &self.input_schema {
            let context_key = self.input_context_key(schema_key);
            let value = ctx.get(&context_key).or_else(|| attrs.default.clone());
            match value {
                Some(v) => {
                    inputs.insert(schema_key.clone(), v);
                }
                None if attrs.required => {
                    return Err(FlowError::MissingInput {
                        op: op_name.to_string(),
                        key: context_key,
                    });
                }
                None => {}
            }
        }
        Ok(inputs)
    }

    /// Writes the op's output back into the context and the response extras.
    ///
    /// A single declared output takes the whole value; multiple declared
    /// outputs expect an object and pick their keys out of it.
    pub fn write_outputs(&self, ctx: &Context, short_name: &str, output: &Value) {
        let keys = self.output_keys(short_name);
        if keys.len() == 1 {
            let context_key = self.output_context_key(&keys[0]);
            ctx.insert(context_key.clone(), output.clone());
            ctx.set_response_field(context_key, output.clone());
            return;
        }
        for schema_key in keys {
            let value = output.get(&schema_key).cloned().unwrap_or(Value::Null);
            let context_key = self.output_context_key(&schema_key);
            ctx.insert(context_key.clone(), value.clone());
            ctx.set_response_field(context_key, value);
        }
    }

    /// JSON schema for the declared inputs (`{"type":"object",...}`), used by
    /// the MCP tool table and the HTTP schema endpoint.
    pub fn input_json_schema(&self) -> Value {
        json_schema_for(&self.input_schema)
    }
}

/// Renders a parameter map as a JSON object schema.
pub fn json_schema_for(params: &BTreeMap<String, ParamAttrs>) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, attrs) in params {
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), Value::String(attrs.param_type.as_str().into()));
        if !attrs.description.is_empty() {
            prop.insert("description".into(), Value::String(attrs.description.clone()));
        }
        if let Some(default) = &attrs.default {
            prop.insert("default".into(), default.clone());
        }
        properties.insert(name.clone(), Value::Object(prop));
        if attrs.required {
            required.push(Value::String(name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ServiceHandles};
    use config::ServiceConfig;
    use serde_json::json;
    use std::time::Duration;

    fn ctx() -> Context {
        Context::new(
            ServiceHandles::new(ServiceConfig::default()),
            json!({}),
            Duration::from_secs(30),
            None,
        )
    }

    #[test]
    fn param_type_matching() {
        assert!(ParamType::String.matches(&json!("x")));
        assert!(ParamType::Integer.matches(&json!(3)));
        assert!(ParamType::Number.matches(&json!(3)));
        assert!(ParamType::Number.matches(&json!(3.5)));
        assert!(!ParamType::Integer.matches(&json!(3.5)));
        assert!(ParamType::Array.matches(&json!([1])));
        assert!(!ParamType::Object.matches(&json!([1])));
    }

    #[test]
    fn bind_reads_mapped_and_suffixed_keys() {
        let tc = ToolCall::new("len of text")
            .with_input("text", ParamAttrs::required(ParamType::String))
            .with_tool_index(1);
        let ctx = ctx();
        ctx.insert("text_1", json!("ab"));
        let inputs = tc.bind_inputs(&ctx, "len").unwrap();
        assert_eq!(inputs["text"], json!("ab"));
    }

    #[test]
    fn bind_applies_defaults_and_rejects_missing_required() {
        let tc = ToolCall::new("search")
            .with_input("query", ParamAttrs::required(ParamType::String))
            .with_input(
                "top_k",
                ParamAttrs::optional(ParamType::Integer).with_default(json!(3)),
            );
        let ctx = ctx();
        let err = tc.bind_inputs(&ctx, "search").unwrap_err();
        assert!(matches!(err, FlowError::MissingInput { .. }));

        ctx.insert("query", json!("rust"));
        let inputs = tc.bind_inputs(&ctx, "search").unwrap();
        assert_eq!(inputs["query"], json!("rust"));
        assert_eq!(inputs["top_k"], json!(3));
    }

    #[test]
    fn input_mapping_renames_context_key() {
        let tc = ToolCall::new("echo")
            .with_input("text", ParamAttrs::required(ParamType::String))
            .with_input_mapping("text", "user_text");
        let ctx = ctx();
        ctx.insert("user_text", json!("hi"));
        let inputs = tc.bind_inputs(&ctx, "echo").unwrap();
        assert_eq!(inputs["text"], json!("hi"));
    }

    #[test]
    fn single_output_takes_whole_value() {
        let tc = ToolCall::new("len")
            .with_output("len", ParamAttrs::optional(ParamType::Integer))
            .with_tool_index(2);
        let ctx = ctx();
        tc.write_outputs(&ctx, "len", &json!(3));
        assert_eq!(ctx.get("len_2"), Some(json!(3)));
        let response = ctx.response();
        assert_eq!(response.extra["len_2"], json!(3));
    }

    #[test]
    fn default_output_key_uses_short_name() {
        let tc = ToolCall::new("echo");
        let ctx = ctx();
        tc.write_outputs(&ctx, "echo", &json!("hi"));
        assert_eq!(ctx.get("echo_result"), Some(json!("hi")));
    }

    #[test]
    fn multi_output_picks_keys_from_object() {
        let tc = ToolCall::new("split")
            .with_output("head", ParamAttrs::optional(ParamType::String))
            .with_output("tail", ParamAttrs::optional(ParamType::String))
            .with_output_mapping("tail", "rest");
        let ctx = ctx();
        tc.write_outputs(&ctx, "split", &json!({"head": "a", "tail": "bc"}));
        assert_eq!(ctx.get("head"), Some(json!("a")));
        assert_eq!(ctx.get("rest"), Some(json!("bc")));
    }

    #[test]
    fn json_schema_shape() {
        let tc = ToolCall::new("search")
            .with_input(
                "query",
                ParamAttrs::required(ParamType::String).with_description("what to find"),
            )
            .with_input("top_k", ParamAttrs::optional(ParamType::Integer));
        let schema = tc.input_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["required"], json!(["query"]));
    }
}
