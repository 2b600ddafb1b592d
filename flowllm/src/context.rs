//! Per-invocation context: the shared state bag, response record, stream
//! outbox, cancellation token and deadline.
//!
//! Exactly one [`Context`] exists per flow invocation; every op in the tree
//! (including parallel children) shares it by handle. The data bag is keyed
//! by string; writes to disjoint keys are safe under Parallel, writes to the
//! same key are a design error in the flow. The context also carries the
//! process-wide [`ServiceHandles`] so ops can reach the worker pool, the op
//! cache and the frozen service config.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use config::ServiceConfig;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use stream_chunk::StreamChunk;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheLocks, InMemoryCache, OpCache};
use crate::error::FlowError;
use crate::scheduler::WorkerPool;
use crate::stream::StreamOutbox;

/// Process-wide handles shared by every invocation: frozen config, the
/// bounded worker pool, the op cache and its in-flight build locks.
pub struct ServiceHandles {
    config: Arc<ServiceConfig>,
    worker_pool: Arc<WorkerPool>,
    cache: Arc<dyn OpCache>,
    cache_locks: CacheLocks,
}

impl ServiceHandles {
    /// Builds handles from a finalized config with the in-memory cache.
    pub fn new(config: ServiceConfig) -> Arc<Self> {
        Self::with_cache(config, Arc::new(InMemoryCache::new()))
    }

    /// Builds handles with an explicit cache backend (e.g. [`crate::cache::FileCache`]).
    pub fn with_cache(config: ServiceConfig, cache: Arc<dyn OpCache>) -> Arc<Self> {
        let worker_pool = Arc::new(WorkerPool::new(config.thread_pool_max_workers));
        Arc::new(Self {
            config: Arc::new(config),
            worker_pool,
            cache,
            cache_locks: CacheLocks::new(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        &self.worker_pool
    }

    pub fn cache(&self) -> &Arc<dyn OpCache> {
        &self.cache
    }

    pub fn cache_locks(&self) -> &CacheLocks {
        &self.cache_locks
    }
}

/// The response record of one invocation.
///
/// `answer` and `messages` always serialize; everything an op writes through
/// its output schema lands in the flattened `extra` bag as well.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Response {
    pub answer: String,
    pub messages: Vec<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

struct ContextInner {
    request_id: String,
    request: Value,
    data: DashMap<String, Value>,
    response: Mutex<Response>,
    outbox: Option<StreamOutbox>,
    cancel: CancellationToken,
    deadline: Instant,
    service: Arc<ServiceHandles>,
}

/// Cheap-to-clone handle to the invocation state. All clones refer to the
/// same underlying bag, response, token and deadline.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Creates a fresh context for one invocation.
    ///
    /// `request` is an immutable snapshot of the incoming payload; `timeout`
    /// becomes the invocation deadline.
    pub fn new(
        service: Arc<ServiceHandles>,
        request: Value,
        timeout: Duration,
        outbox: Option<StreamOutbox>,
    ) -> Self {
        Self::build(service, request, timeout, outbox, CancellationToken::new())
    }

    /// Creates a streaming context: the outbox shares the context's
    /// cancellation token, so cancelling the invocation unblocks emitters.
    /// Returns the context and the receiving end for the service layer.
    pub fn new_with_stream(
        service: Arc<ServiceHandles>,
        request: Value,
        timeout: Duration,
        capacity: usize,
    ) -> (Self, tokio::sync::mpsc::Receiver<StreamChunk>) {
        let cancel = CancellationToken::new();
        let (outbox, rx) = StreamOutbox::channel(capacity, cancel.clone());
        (
            Self::build(service, request, timeout, Some(outbox), cancel),
            rx,
        )
    }

    fn build(
        service: Arc<ServiceHandles>,
        request: Value,
        timeout: Duration,
        outbox: Option<StreamOutbox>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id: uuid::Uuid::new_v4().to_string(),
                request,
                data: DashMap::new(),
                response: Mutex::new(Response::default()),
                outbox,
                cancel,
                deadline: Instant::now() + timeout,
                service,
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// The request payload as received, before kwargs binding.
    pub fn request(&self) -> &Value {
        &self.inner.request
    }

    // --- data bag -----------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.get(key).map(|v| v.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.inner.data.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.data.contains_key(key)
    }

    /// Snapshot of the whole bag; order is unspecified.
    pub fn data_snapshot(&self) -> serde_json::Map<String, Value> {
        self.inner
            .data
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // --- response -----------------------------------------------------------

    /// Runs `f` with the response record locked.
    pub fn with_response<R>(&self, f: impl FnOnce(&mut Response) -> R) -> R {
        let mut guard = self
            .inner
            .response
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn set_answer(&self, answer: impl Into<String>) {
        self.with_response(|r| r.answer = answer.into());
    }

    pub fn answer(&self) -> String {
        self.with_response(|r| r.answer.clone())
    }

    pub fn push_message(&self, message: Value) {
        self.with_response(|r| r.messages.push(message));
    }

    pub fn set_response_field(&self, key: impl Into<String>, value: Value) {
        self.with_response(|r| {
            r.extra.insert(key.into(), value);
        });
    }

    /// Clones the response record out (used by the dispatcher on completion).
    pub fn response(&self) -> Response {
        self.with_response(|r| r.clone())
    }

    // --- streaming ----------------------------------------------------------

    pub fn is_stream(&self) -> bool {
        self.inner.outbox.is_some()
    }

    /// Emits a chunk into the outbox. A no-op on non-stream invocations.
    pub async fn emit(&self, chunk: StreamChunk) -> Result<(), FlowError> {
        match &self.inner.outbox {
            Some(outbox) => outbox.emit(chunk).await,
            None => Ok(()),
        }
    }

    pub fn outbox(&self) -> Option<&StreamOutbox> {
        self.inner.outbox.as_ref()
    }

    // --- cancellation and deadline -----------------------------------------

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    pub fn remaining_time(&self) -> Duration {
        self.inner.deadline.saturating_duration_since(Instant::now())
    }

    // --- service handles ----------------------------------------------------

    pub fn service(&self) -> &Arc<ServiceHandles> {
        &self.inner.service
    }

    pub fn config(&self) -> &ServiceConfig {
        self.inner.service.config()
    }

    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        self.inner.service.worker_pool()
    }

    pub fn cache(&self) -> &Arc<dyn OpCache> {
        self.inner.service.cache()
    }

    /// Configured prompt locale, e.g. `"zh"`. Empty means no preference.
    pub fn language(&self) -> &str {
        &self.inner.service.config().language
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.inner.request_id)
            .field("keys", &self.inner.data.len())
            .field("stream", &self.inner.outbox.is_some())
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> Context {
        let service = ServiceHandles::new(ServiceConfig::default());
        Context::new(service, json!({}), Duration::from_secs(60), None)
    }

    #[test]
    fn data_bag_round_trip() {
        let ctx = test_context();
        ctx.insert("n", json!(1));
        assert_eq!(ctx.get("n"), Some(json!(1)));
        assert!(ctx.contains_key("n"));
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn clones_share_state() {
        let ctx = test_context();
        let other = ctx.clone();
        other.insert("k", json!("v"));
        assert_eq!(ctx.get("k"), Some(json!("v")));
        other.set_answer("done");
        assert_eq!(ctx.answer(), "done");
    }

    #[test]
    fn response_serializes_with_flattened_extras() {
        let ctx = test_context();
        ctx.set_answer("hi");
        ctx.set_response_field("n", json!(3));
        let body = serde_json::to_value(ctx.response()).unwrap();
        assert_eq!(body["answer"], "hi");
        assert_eq!(body["messages"], json!([]));
        assert_eq!(body["n"], 3);
    }

    #[tokio::test]
    async fn emit_without_outbox_is_noop() {
        let ctx = test_context();
        assert!(!ctx.is_stream());
        ctx.emit(StreamChunk::answer("x")).await.unwrap();
    }

    #[test]
    fn cancellation_is_shared() {
        let ctx = test_context();
        let clone = ctx.clone();
        assert!(!clone.is_cancelled());
        ctx.cancel();
        assert!(clone.is_cancelled());
    }
}
