//! Vector retrieval op: embeds the query through the bound store's embedding
//! model and returns the top-k documents.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::Context;
use crate::error::FlowError;
use crate::op::{Op, OpArgs, OpBase, ParamAttrs, ParamType, ToolCall};

/// Reads `query` and optional `top_k`, writes the scored hits.
pub struct VectorSearchOp {
    base: OpBase,
}

impl VectorSearchOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let base = OpBase::new("VectorSearchOp", args)?.with_tool_call(
            ToolCall::new("search the vector store")
                .with_input(
                    "query",
                    ParamAttrs::required(ParamType::String).with_description("search text"),
                )
                .with_input(
                    "top_k",
                    ParamAttrs::optional(ParamType::Integer).with_default(json!(3)),
                )
                .with_output("documents", ParamAttrs::optional(ParamType::Array)),
        );
        Ok(Self { base })
    }
}

#[async_trait]
impl Op for VectorSearchOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn async_execute(&self, ctx: &Context, inputs: &OpArgs) -> Result<Value, FlowError> {
        let query = inputs
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let top_k = inputs.get("top_k").and_then(Value::as_u64).unwrap_or(3) as usize;
        let store = self.base.vector_store(ctx)?;
        let hits = store.search(query, top_k).await?;
        serde_json::to_value(hits)
            .map_err(|e| FlowError::op_failed(format!("serialize search hits: {e}")))
    }

    fn default_output(&self) -> Value {
        json!([])
    }

    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
        })
    }
}
