//! Embedding capability: opaque text-to-vector models.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FlowError;

/// An opaque embedding model. Re-entrant; shared by reference across ops.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Embeds each text; the result has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, FlowError>;
}

/// Deterministic hash-based embeddings for tests and offline runs.
///
/// Equal texts embed equally; similar texts do not. Good enough to exercise
/// vector-store plumbing without a provider.
pub struct MockEmbedding {
    dim: usize,
}

impl MockEmbedding {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingModel for MockEmbedding {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, FlowError> {
        Ok(texts
            .iter()
            .map(|text| {
                let digest = blake3::hash(text.as_bytes());
                let bytes = digest.as_bytes();
                (0..self.dim)
                    .map(|i| (bytes[i % bytes.len()] as f32 / 255.0) * 2.0 - 1.0)
                    .collect()
            })
            .collect())
    }
}

/// OpenAI-compatible `/embeddings` adapter.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedding {
    pub fn from_config(config: &config::EmbeddingModelConfig) -> Result<Self, FlowError> {
        let params = &config.params;
        let api_base = params
            .get("api_base")
            .and_then(Value::as_str)
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        let api_key = match params.get("api_key").and_then(Value::as_str) {
            Some(key) => key.to_string(),
            None => {
                let env_name = params
                    .get("api_key_env")
                    .and_then(Value::as_str)
                    .unwrap_or("OPENAI_API_KEY");
                std::env::var(env_name).map_err(|_| {
                    FlowError::op_failed(format!(
                        "embedding backend `openai` needs an api key ({env_name} unset)"
                    ))
                })?
            }
        };
        Ok(Self {
            client: reqwest::Client::new(),
            api_base,
            api_key,
            model: config.model_name.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, FlowError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({"model": self.model, "input": texts}))
            .send()
            .await
            .map_err(|e| FlowError::transient(format!("embedding request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("embedding returned {status}: {text}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(FlowError::transient(message))
            } else {
                Err(FlowError::op_failed(message))
            };
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| FlowError::transient(format!("embedding response body: {e}")))?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| FlowError::op_failed(format!("embedding response missing data: {body}")))?;
        data.iter()
            .map(|entry| {
                entry
                    .get("embedding")
                    .and_then(Value::as_array)
                    .map(|xs| {
                        xs.iter()
                            .filter_map(Value::as_f64)
                            .map(|x| x as f32)
                            .collect::<Vec<f32>>()
                    })
                    .ok_or_else(|| FlowError::op_failed("embedding entry missing vector".to_string()))
            })
            .collect()
    }
}
