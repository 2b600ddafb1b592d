//! LLM capability: the trait ops program against, plus reference
//! implementations ([`MockLlm`] for tests and config-driven mocks,
//! [`OpenAiChat`] for any OpenAI-compatible endpoint).
//!
//! # Streaming
//!
//! `chat_stream` accepts a sender for incremental text deltas and still
//! returns the full completion. Implementations without true streaming fall
//! back to one delta carrying the whole reply.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::OpenAiChat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::FlowError;

/// Chat role on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An opaque chat model. Handles are shared by reference across ops and must
/// be re-entrant; they are resolved once per op and never mutated.
impl std::fmt::Debug for dyn Llm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Llm").field("model_name", &self.model_name()).finish()
    }
}

#[async_trait]
pub trait Llm: Send + Sync {
    fn model_name(&self) -> &str;

    /// One completion: messages in, assistant text out.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, FlowError>;

    /// Streaming completion: deltas go to `chunk_tx` as they arrive; the full
    /// text is returned. The default forwards the whole reply as one delta.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<String, FlowError> {
        let text = self.chat(messages).await?;
        let _ = chunk_tx.send(text.clone()).await;
        Ok(text)
    }
}
