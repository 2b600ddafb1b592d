//! Mock LLM: scripted replies for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatMessage, Llm};
use crate::error::FlowError;

/// Returns scripted replies in order, then the fixed default reply. With no
/// script and no default, echoes the last user message.
pub struct MockLlm {
    replies: Mutex<VecDeque<String>>,
    default_reply: Option<String>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: None,
        }
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: Some(reply.into()),
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            default_reply: None,
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply.into());
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Llm for MockLlm {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, FlowError> {
        let scripted = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        if let Some(reply) = scripted {
            return Ok(reply);
        }
        if let Some(reply) = &self.default_reply {
            return Ok(reply.clone());
        }
        Ok(messages
            .iter()
            .rev()
            .find(|m| m.role == super::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn scripted_replies_in_order_then_default() {
        let llm = MockLlm::with_replies(["one", "two"]);
        let msgs = [ChatMessage::user("hi")];
        assert_eq!(llm.chat(&msgs).await.unwrap(), "one");
        assert_eq!(llm.chat(&msgs).await.unwrap(), "two");
        // Script exhausted, no default: echo the user message.
        assert_eq!(llm.chat(&msgs).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn default_stream_forwards_one_delta() {
        let llm = MockLlm::with_reply("hello world");
        let (tx, mut rx) = mpsc::channel(4);
        let full = llm
            .chat_stream(&[ChatMessage::user("x")], tx)
            .await
            .unwrap();
        assert_eq!(full, "hello world");
        assert_eq!(rx.recv().await.unwrap(), "hello world");
        assert!(rx.recv().await.is_none());
    }
}
