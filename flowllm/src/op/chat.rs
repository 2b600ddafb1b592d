//! LLM chat op: one completion against the op's bound LLM, with token
//! deltas forwarded into the stream outbox when the invocation streams.

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_chunk::StreamChunk;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::FlowError;
use crate::llm::ChatMessage;
use crate::op::{arg_str, Op, OpArgs, OpBase, ParamAttrs, ParamType, ToolCall};

/// Reads `query`, calls the bound LLM, writes the completion as the answer.
///
/// Constructor kwargs: `llm` selects the resource name (default `default`);
/// `system_prompt` prepends a system message.
pub struct LlmChatOp {
    base: OpBase,
    system_prompt: Option<String>,
}

impl LlmChatOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let system_prompt = arg_str(&args, "system_prompt")?;
        let base = OpBase::new("LlmChatOp", args)?
            .with_save_answer(true)
            .with_tool_call(
                ToolCall::new("chat with the model")
                    .with_input(
                        "query",
                        ParamAttrs::required(ParamType::String).with_description("user message"),
                    )
                    .with_output("answer", ParamAttrs::optional(ParamType::String)),
            );
        Ok(Self {
            base,
            system_prompt,
        })
    }

    fn messages(&self, query: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(query));
        messages
    }
}

#[async_trait]
impl Op for LlmChatOp {
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
            .unwrap_or_default()
            .to_string();
        let llm = self.base.llm(ctx)?;
        let messages = self.messages(&query);

        let full = if ctx.is_stream() {
            let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
            let forward_ctx = ctx.clone();
            let forward = async move {
                while let Some(delta) = chunk_rx.recv().await {
                    if forward_ctx.emit(StreamChunk::answer(delta)).await.is_err() {
                        break;
                    }
                }
            };
            let (completion, ()) = tokio::join!(llm.chat_stream(&messages, chunk_tx), forward);
            completion?
        } else {
            llm.chat(&messages).await?
        };

        ctx.push_message(json!({"role": "user", "content": query}));
        ctx.push_message(json!({"role": "assistant", "content": full}));
        Ok(Value::String(full))
    }

    fn default_output(&self) -> Value {
        Value::String(String::new())
    }

    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
            system_prompt: self.system_prompt.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServiceHandles;
    use crate::op::runtime;
    use crate::registry::register_builtin_resources;
    use crate::stream::StreamOutbox;
    use config::{LlmConfig, ServiceConfig};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn mock_config(reply: &str) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        let mut params = serde_json::Map::new();
        params.insert("reply".into(), json!(reply));
        config.llm.insert(
            "default".into(),
            LlmConfig {
                backend: "mock".into(),
                model_name: "mock".into(),
                params,
                token_count: None,
            },
        );
        config
    }

    fn kwargs(pairs: &[(&str, Value)]) -> OpArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn chat_writes_answer_and_messages() {
        register_builtin_resources();
        let service = ServiceHandles::new(mock_config("the answer"));
        let ctx = Context::new(service, json!({}), Duration::from_secs(30), None);
        let op = LlmChatOp::new(OpArgs::new()).unwrap();
        let out = runtime::invoke(&op, &ctx, kwargs(&[("query", json!("question"))]))
            .await
            .unwrap();
        assert_eq!(out, json!("the answer"));
        assert_eq!(ctx.answer(), "the answer");
        let response = ctx.response();
        assert_eq!(response.messages.len(), 2);
        assert_eq!(response.messages[1]["role"], "assistant");
    }

    #[tokio::test]
    async fn streaming_chat_forwards_chunks() {
        register_builtin_resources();
        let service = ServiceHandles::new(mock_config("streamed"));
        let cancel = CancellationToken::new();
        let (outbox, mut rx) = StreamOutbox::channel(16, cancel);
        let ctx = Context::new(service, json!({}), Duration::from_secs(30), Some(outbox));
        let op = LlmChatOp::new(OpArgs::new()).unwrap();
        runtime::invoke(&op, &ctx, kwargs(&[("query", json!("q"))]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.content, json!("streamed"));
    }
}
