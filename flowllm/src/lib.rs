//! # FlowLLM core
//!
//! Composable computational units ("ops") served as concurrent pipelines
//! ("flows"). One shared [`Context`] flows through an op tree built from
//! three combinators — `>>` (sequential), `|` (parallel) and `<<`
//! (container children) — parsed from a restricted expression language and
//! executed by a lifecycle-owning runtime.
//!
//! ## Main modules
//!
//! - [`op`]: the [`Op`] trait and [`OpBase`], the execution lifecycle
//!   ([`op::runtime`]), tool schemas ([`ToolCall`]), the combinators
//!   ([`SequentialOp`], [`ParallelOp`]), prompt templates ([`PromptSet`]),
//!   and the built-in ops ([`op::chat`], [`op::retrieval`], [`op::demo`]).
//! - [`flow`]: [`Flow`], the expression parser ([`flow::parser`]) and the
//!   request-facing [`Dispatcher`].
//! - [`context`]: per-invocation state ([`Context`], [`Response`],
//!   [`ServiceHandles`]).
//! - [`scheduler`]: [`TaskGroup`] submit/join semantics and the bounded
//!   [`WorkerPool`] for blocking bodies.
//! - [`stream`]: the bounded chunk outbox ([`StreamOutbox`]); wire types
//!   re-exported from the `stream-chunk` crate.
//! - [`cache`]: the op output cache ([`OpCache`], [`InMemoryCache`],
//!   [`FileCache`]) and fingerprinting.
//! - [`registry`]: the frozen process-wide name-to-constructor index.
//! - [`llm`] / [`embedding`] / [`vector_store`] / [`token_counter`]: opaque
//!   capability traits with mock and OpenAI-compatible reference adapters.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowllm::{Dispatcher, Flow, InvokeMode, ServiceHandles};
//! use flowllm::flow::parser::parse_flow;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), flowllm::FlowError> {
//! flowllm::register_builtins();
//! flowllm::op::demo::register_demo_ops();
//!
//! let service = ServiceHandles::new(config::ServiceConfig::default());
//! let mut dispatcher = Dispatcher::new(service);
//! dispatcher.register_flow(Flow::new("inc", parse_flow("AddOneOp()")?))?;
//!
//! let mut kwargs = serde_json::Map::new();
//! kwargs.insert("n".into(), serde_json::json!(41));
//! let response = dispatcher.execute("inc", kwargs, InvokeMode::Http).await?;
//! assert_eq!(response.extra["n"], serde_json::json!(42));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod embedding;
pub mod error;
pub mod flow;
pub mod llm;
pub mod op;
pub mod registry;
pub mod scheduler;
pub mod stream;
pub mod token_counter;
pub mod vector_store;

pub use cache::{FileCache, InMemoryCache, OpCache};
pub use context::{Context, Response, ServiceHandles};
pub use error::FlowError;
pub use flow::{Dispatcher, Flow, InvokeMode};
pub use llm::{ChatMessage, Llm, MockLlm};
pub use op::{
    CachePolicy, Combinator, CompositionError, Op, OpArgs, OpBase, ParallelOp, ParamAttrs,
    ParamType, PromptSet, SequentialOp, ToolCall,
};
pub use registry::Registry;
pub use scheduler::{TaskGroup, WorkerPool};
pub use stream::StreamOutbox;

// Wire types live in their own crate; re-export for convenience.
pub use stream_chunk::{ChunkKind, StreamChunk};

/// Registers the built-in resource backends and the shipped ops (`LlmChatOp`,
/// `VectorSearchOp`) on the global registry. Idempotent.
pub fn register_builtins() {
    registry::register_builtin_resources();
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let registry = Registry::global();
        let results = [
            registry.register_op(
                "LlmChatOp",
                std::sync::Arc::new(|args| {
                    Ok(Box::new(op::chat::LlmChatOp::new(args)?) as Box<dyn Op>)
                }),
            ),
            registry.register_op(
                "VectorSearchOp",
                std::sync::Arc::new(|args| {
                    Ok(Box::new(op::retrieval::VectorSearchOp::new(args)?) as Box<dyn Op>)
                }),
            ),
        ];
        for result in results {
            if let Err(err) = result {
                tracing::error!(error = %err, "builtin op registration failed");
            }
        }
    });
}
