//! Stream chunk protocol: the wire shape for one streamed chunk (type + content).
//!
//! Ops emit [`StreamChunk`]s into the invocation outbox; the service layer
//! renders them as SSE `data:` lines. `Done` is terminal and renders as the
//! literal `[DONE]` sentinel rather than a JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a streamed chunk. Ordered within one stream; `Done` appears at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Final-answer content for the client.
    Answer,
    /// Intermediate reasoning content; transports may suppress it.
    Think,
    /// Tool invocation or tool result payload.
    Tool,
    /// Error message; followed by `Done`.
    Error,
    /// Terminal sentinel appended by the service after the flow settles.
    Done,
}

impl ChunkKind {
    /// Wire name of the kind (`"answer"`, `"think"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Answer => "answer",
            ChunkKind::Think => "think",
            ChunkKind::Tool => "tool",
            ChunkKind::Error => "error",
            ChunkKind::Done => "done",
        }
    }
}

/// One streamed chunk: kind plus string-or-object content.
///
/// Wire shape is `{"type": <kind>, "content": <string|object>}`, except for
/// `Done` which renders as the bare `[DONE]` sentinel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub content: Value,
}

impl StreamChunk {
    pub fn new(kind: ChunkKind, content: Value) -> Self {
        Self { kind, content }
    }

    /// Answer chunk with text content.
    pub fn answer(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Answer, Value::String(content.into()))
    }

    /// Think chunk with text content.
    pub fn think(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Think, Value::String(content.into()))
    }

    /// Tool chunk with structured content.
    pub fn tool(content: Value) -> Self {
        Self::new(ChunkKind::Tool, content)
    }

    /// Error chunk with the failure message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ChunkKind::Error, Value::String(message.into()))
    }

    /// Terminal sentinel chunk.
    pub fn done() -> Self {
        Self::new(ChunkKind::Done, Value::Null)
    }

    pub fn is_done(&self) -> bool {
        self.kind == ChunkKind::Done
    }

    /// JSON payload for the wire (`{"type": ..., "content": ...}`).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// SSE data payload: the JSON object, or the literal `[DONE]` for the terminal chunk.
    pub fn sse_data(&self) -> String {
        if self.is_done() {
            "[DONE]".to_string()
        } else {
            serde_json::to_string(self).unwrap_or_else(|_| "[DONE]".to_string())
        }
    }

    /// Full SSE event line (`data: <payload>\n\n`).
    pub fn sse_event(&self) -> String {
        format!("data: {}\n\n", self.sse_data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_kind_wire_names() {
        assert_eq!(ChunkKind::Answer.as_str(), "answer");
        assert_eq!(ChunkKind::Think.as_str(), "think");
        assert_eq!(ChunkKind::Tool.as_str(), "tool");
        assert_eq!(ChunkKind::Error.as_str(), "error");
        assert_eq!(ChunkKind::Done.as_str(), "done");
    }

    #[test]
    fn answer_chunk_serializes_with_type_tag() {
        let chunk = StreamChunk::answer("hello");
        let v = chunk.to_value().unwrap();
        assert_eq!(v["type"], "answer");
        assert_eq!(v["content"], "hello");
    }

    #[test]
    fn tool_chunk_keeps_structured_content() {
        let chunk = StreamChunk::tool(serde_json::json!({"name": "search", "args": {"q": "x"}}));
        let v = chunk.to_value().unwrap();
        assert_eq!(v["type"], "tool");
        assert_eq!(v["content"]["name"], "search");
    }

    #[test]
    fn done_renders_as_sentinel() {
        let chunk = StreamChunk::done();
        assert!(chunk.is_done());
        assert_eq!(chunk.sse_data(), "[DONE]");
        assert_eq!(chunk.sse_event(), "data: [DONE]\n\n");
    }

    #[test]
    fn error_then_done_shapes() {
        let err = StreamChunk::error("boom");
        assert_eq!(err.sse_data(), r#"{"type":"error","content":"boom"}"#);
        assert!(!err.is_done());
    }

    #[test]
    fn round_trips_through_serde() {
        let chunk = StreamChunk::answer("1");
        let s = serde_json::to_string(&chunk).unwrap();
        let back: StreamChunk = serde_json::from_str(&s).unwrap();
        assert_eq!(back, chunk);
    }
}
