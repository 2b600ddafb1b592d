//! OpenAI-compatible chat adapter over plain HTTP.
//!
//! Works against any `/chat/completions` endpoint. Streaming parses the SSE
//! body line by line (`data: <json>` frames terminated by `data: [DONE]`);
//! no provider SDK involved. Network failures, 429 and 5xx map to
//! [`FlowError::Transient`] so the op runtime may retry them.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{ChatMessage, Llm};
use crate::error::FlowError;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Keys consumed by the adapter itself; everything else in `params` is
/// forwarded verbatim in the request body (temperature, top_p, ...).
const ADAPTER_PARAM_KEYS: &[&str] = &["api_base", "api_key", "api_key_env"];

pub struct OpenAiChat {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    body_params: serde_json::Map<String, Value>,
}

impl OpenAiChat {
    /// Builds the adapter from a named LLM config entry.
    ///
    /// `params.api_base` overrides the endpoint; the key comes from
    /// `params.api_key` or the environment variable named by
    /// `params.api_key_env` (default `OPENAI_API_KEY`).
    pub fn from_config(config: &config::LlmConfig) -> Result<Self, FlowError> {
        let params = &config.params;
        let api_base = params
            .get("api_base")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let api_key = match params.get("api_key").and_then(Value::as_str) {
            Some(key) => key.to_string(),
            None => {
                let env_name = params
                    .get("api_key_env")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_API_KEY_ENV);
                std::env::var(env_name).map_err(|_| {
                    FlowError::op_failed(format!(
                        "llm backend `openai` needs an api key ({env_name} unset)"
                    ))
                })?
            }
        };
        let body_params = params
            .iter()
            .filter(|(key, _)| !ADAPTER_PARAM_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Self {
            client: reqwest::Client::new(),
            api_base,
            api_key,
            model: config.model_name.clone(),
            body_params,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = serde_json::Map::new();
        body.insert("model".into(), Value::String(self.model.clone()));
        body.insert(
            "messages".into(),
            serde_json::to_value(messages).unwrap_or_else(|_| json!([])),
        );
        if stream {
            body.insert("stream".into(), Value::Bool(true));
        }
        for (key, value) in &self.body_params {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response, FlowError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FlowError::transient(format!("llm request failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = format!("llm returned {status}: {text}");
        if status.as_u16() == 429 || status.is_server_error() {
            Err(FlowError::transient(message))
        } else {
            Err(FlowError::op_failed(message))
        }
    }
}

/// Extracts the delta text from one streamed chunk frame.
fn delta_content(frame: &Value) -> Option<&str> {
    frame
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

#[async_trait]
impl Llm for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, FlowError> {
        let response = self.post(self.request_body(messages, false)).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| FlowError::transient(format!("llm response body: {e}")))?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                FlowError::op_failed(format!("llm response missing choices[0].message.content: {body}"))
            })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<String, FlowError> {
        let response = self.post(self.request_body(messages, true)).await?;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes =
                chunk.map_err(|e| FlowError::transient(format!("llm stream read: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // SSE frames are newline-delimited; keep the trailing partial line.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(full);
                }
                let Ok(frame) = serde_json::from_str::<Value>(data) else {
                    tracing::debug!(line = %data, "skipping unparsable sse frame");
                    continue;
                };
                if let Some(delta) = delta_content(&frame) {
                    full.push_str(delta);
                    if chunk_tx.send(delta.to_string()).await.is_err() {
                        // Consumer gone; stop reading.
                        return Ok(full);
                    }
                }
            }
        }
        Ok(full)
    }
}
