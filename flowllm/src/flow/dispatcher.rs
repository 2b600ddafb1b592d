//! Dispatcher: flow table plus request-to-invocation binding.
//!
//! For each request: look up the flow, validate kwargs against its input
//! schema (strict under MCP, passthrough under HTTP/CLI), build a fresh
//! [`Context`] with a deadline and cancellation token, and drive the flow's
//! root op through the op runtime. Stream flows get an outbox whose
//! receiving end goes back to the service layer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stream_chunk::StreamChunk;
use tokio::sync::mpsc;

use crate::context::{Context, Response, ServiceHandles};
use crate::error::FlowError;
use crate::flow::Flow;
use crate::op::{runtime, OpArgs, ParamAttrs};

/// Which validation regime applies to an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeMode {
    /// Schema optional; unknown fields pass through into the context.
    Http,
    /// Schema mandatory; unknown fields are rejected.
    Mcp,
    /// Command-line runner; same leniency as HTTP.
    Cli,
}

impl InvokeMode {
    fn strict(&self) -> bool {
        matches!(self, InvokeMode::Mcp)
    }
}

pub struct Dispatcher {
    flows: BTreeMap<String, Arc<Flow>>,
    service: Arc<ServiceHandles>,
}

impl Dispatcher {
    pub fn new(service: Arc<ServiceHandles>) -> Self {
        Self {
            flows: BTreeMap::new(),
            service,
        }
    }

    /// Builds the flow table from the service config's `[flow.*]` entries.
    pub fn from_config(service: Arc<ServiceHandles>) -> Result<Self, FlowError> {
        let mut dispatcher = Self::new(service.clone());
        for (name, flow_config) in &service.config().flow {
            dispatcher.register_flow(Flow::from_config(name, flow_config)?)?;
        }
        Ok(dispatcher)
    }

    pub fn register_flow(&mut self, flow: Flow) -> Result<(), FlowError> {
        if self.flows.contains_key(flow.name()) {
            return Err(FlowError::DuplicateRegistration {
                category: "flow",
                name: flow.name().to_string(),
            });
        }
        tracing::info!(flow = %flow.name(), expr = %flow.expr(), "registered flow");
        self.flows.insert(flow.name().to_string(), Arc::new(flow));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Flow>> {
        self.flows.get(name)
    }

    pub fn flows(&self) -> impl Iterator<Item = &Arc<Flow>> {
        self.flows.values()
    }

    pub fn service(&self) -> &Arc<ServiceHandles> {
        &self.service
    }

    /// Runs a non-stream invocation to completion and returns the response.
    pub async fn execute(
        &self,
        name: &str,
        kwargs: OpArgs,
        mode: InvokeMode,
    ) -> Result<Response, FlowError> {
        let flow = self.resolve(name)?;
        let (kwargs, timeout) = self.prepare(&flow, kwargs, mode)?;
        let ctx = Context::new(
            self.service.clone(),
            Value::Object(kwargs.clone()),
            timeout,
            None,
        );
        tracing::debug!(flow = %flow.name(), request_id = %ctx.request_id(), "dispatching flow");

        let op = flow.op().clone();
        tokio::select! {
            result = runtime::invoke(op.as_ref(), &ctx, kwargs) => {
                result.map(|_| ctx.response())
            }
            _ = tokio::time::sleep(timeout) => {
                ctx.cancel();
                Err(FlowError::Timeout(format!(
                    "flow `{name}` exceeded its {timeout:?} deadline"
                )))
            }
        }
    }

    /// Starts a stream invocation; chunks arrive on the returned receiver in
    /// emission order. On failure the last chunk before close is an `error`
    /// chunk; the transport appends the terminal `[DONE]`.
    pub fn execute_stream(
        &self,
        name: &str,
        kwargs: OpArgs,
        mode: InvokeMode,
    ) -> Result<mpsc::Receiver<StreamChunk>, FlowError> {
        let flow = self.resolve(name)?;
        let (kwargs, timeout) = self.prepare(&flow, kwargs, mode)?;
        let (ctx, rx) = Context::new_with_stream(
            self.service.clone(),
            Value::Object(kwargs.clone()),
            timeout,
            self.service.config().stream_outbox_capacity,
        );
        tracing::debug!(flow = %flow.name(), request_id = %ctx.request_id(), "dispatching stream flow");

        let op = flow.op().clone();
        let flow_name = name.to_string();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = runtime::invoke(op.as_ref(), &ctx, kwargs) => result,
                _ = tokio::time::sleep(timeout) => {
                    ctx.cancel();
                    Err(FlowError::Timeout(format!(
                        "flow `{flow_name}` exceeded its {timeout:?} deadline"
                    )))
                }
            };
            if let Err(err) = result {
                tracing::warn!(flow = %flow_name, error = %err, "stream flow failed");
                // Best effort: the receiver may already be gone.
                if let Some(outbox) = ctx.outbox() {
                    let _ = outbox.try_emit(StreamChunk::error(err.to_string()));
                }
            }
            // Dropping the context closes the outbox; the transport observes
            // the close and appends the terminal sentinel.
        });
        Ok(rx)
    }

    fn resolve(&self, name: &str) -> Result<Arc<Flow>, FlowError> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownFlow(name.to_string()))
    }

    /// Validates kwargs and derives the effective deadline. A request may
    /// lower the configured deadline via `timeout_ms`, never raise it.
    fn prepare(
        &self,
        flow: &Flow,
        mut kwargs: OpArgs,
        mode: InvokeMode,
    ) -> Result<(OpArgs, Duration), FlowError> {
        let configured = Duration::from_millis(self.service.config().timeout_ms);
        let timeout = match kwargs.remove("timeout_ms") {
            None => configured,
            Some(value) => {
                let requested = value.as_u64().ok_or_else(|| {
                    FlowError::InputValidation(format!(
                        "timeout_ms must be a non-negative integer, got {value}"
                    ))
                })?;
                configured.min(Duration::from_millis(requested))
            }
        };
        let kwargs = validate_kwargs(flow, kwargs, mode)?;
        Ok((kwargs, timeout))
    }
}

/// Applies the flow's input schema to the request kwargs.
fn validate_kwargs(
    flow: &Flow,
    mut kwargs: OpArgs,
    mode: InvokeMode,
) -> Result<OpArgs, FlowError> {
    let Some(schema) = flow.input_schema() else {
        if mode.strict() {
            return Err(FlowError::InputValidation(format!(
                "flow `{}` declares no input schema",
                flow.name()
            )));
        }
        return Ok(kwargs);
    };

    if mode.strict() {
        if let Some(unknown) = kwargs.keys().find(|key| !schema.contains_key(*key)) {
            return Err(FlowError::InputValidation(format!(
                "unknown field `{unknown}` for flow `{}`",
                flow.name()
            )));
        }
    }

    for (name, attrs) in schema {
        match kwargs.get(name) {
            Some(value) => check_type(name, attrs, value)?,
            None => {
                if let Some(default) = &attrs.default {
                    kwargs.insert(name.clone(), default.clone());
                } else if attrs.required {
                    return Err(FlowError::InputValidation(format!(
                        "missing required field `{name}` for flow `{}`",
                        flow.name()
                    )));
                }
            }
        }
    }
    Ok(kwargs)
}

fn check_type(name: &str, attrs: &ParamAttrs, value: &Value) -> Result<(), FlowError> {
    if attrs.param_type.matches(value) {
        Ok(())
    } else {
        Err(FlowError::InputValidation(format!(
            "field `{name}` must be of type {}, got {value}",
            attrs.param_type.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::parser::parse_flow;
    use crate::op::demo::register_demo_ops;
    use crate::op::{ParamType, ToolCall};
    use config::ServiceConfig;
    use serde_json::json;

    fn kwargs(pairs: &[(&str, Value)]) -> OpArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn dispatcher_with(flows: &[(&str, &str, bool)]) -> Dispatcher {
        register_demo_ops();
        let service = ServiceHandles::new(ServiceConfig::default());
        let mut dispatcher = Dispatcher::new(service);
        for (name, expr, stream) in flows {
            let flow = Flow::new(name, parse_flow(expr).unwrap()).with_stream(*stream);
            dispatcher.register_flow(flow).unwrap();
        }
        dispatcher
    }

    fn schema(pairs: &[(&str, ParamType, bool)]) -> BTreeMap<String, ParamAttrs> {
        pairs
            .iter()
            .map(|(name, ty, required)| {
                (
                    name.to_string(),
                    ParamAttrs {
                        param_type: *ty,
                        required: *required,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn echo_flow_end_to_end() {
        let dispatcher = dispatcher_with(&[("demo_echo", "EchoOp()", false)]);
        let response = dispatcher
            .execute("demo_echo", kwargs(&[("text", json!("hi"))]), InvokeMode::Http)
            .await
            .unwrap();
        assert_eq!(response.answer, "echo: hi");
        assert!(response.messages.is_empty());
    }

    #[tokio::test]
    async fn unknown_flow_is_reported() {
        let dispatcher = dispatcher_with(&[]);
        let err = dispatcher
            .execute("nope", OpArgs::new(), InvokeMode::Http)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownFlow(_)));
    }

    /// **Scenario**: `inc3` — three sequential AddOneOps leave n == 3.
    #[tokio::test]
    async fn sequential_composition_accumulates() {
        let dispatcher =
            dispatcher_with(&[("inc3", "AddOneOp() >> AddOneOp() >> AddOneOp()", false)]);
        let response = dispatcher
            .execute("inc3", kwargs(&[("n", json!(0))]), InvokeMode::Http)
            .await
            .unwrap();
        assert_eq!(response.extra["n"], json!(3));
    }

    /// **Scenario**: `lens` — parallel LenOps write disjoint suffixed keys.
    #[tokio::test]
    async fn parallel_aggregation() {
        let dispatcher = dispatcher_with(&[(
            "lens",
            "LenOp(tool_index=1) | LenOp(tool_index=2)",
            false,
        )]);
        let response = dispatcher
            .execute(
                "lens",
                kwargs(&[("text_1", json!("ab")), ("text_2", json!("xyz"))]),
                InvokeMode::Http,
            )
            .await
            .unwrap();
        assert_eq!(response.extra["len_1"], json!(2));
        assert_eq!(response.extra["len_2"], json!(3));
    }

    /// **Scenario**: request deadline fires; the response is a Timeout error.
    #[tokio::test]
    async fn request_deadline_times_out() {
        let dispatcher = dispatcher_with(&[("slow", "SlowOp(sleep_s=2.0)", false)]);
        let started = std::time::Instant::now();
        let err = dispatcher
            .execute(
                "slow",
                kwargs(&[("timeout_ms", json!(100))]),
                InvokeMode::Http,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Timeout(_)), "got {err}");
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    /// **Scenario**: stream flow delivers chunks in order; failure appends an
    /// error chunk before close.
    #[tokio::test]
    async fn stream_flow_chunks_in_order() {
        let dispatcher = dispatcher_with(&[("count", "CountStreamOp()", true)]);
        let mut rx = dispatcher
            .execute_stream("count", OpArgs::new(), InvokeMode::Http)
            .unwrap();
        let mut contents = Vec::new();
        while let Some(chunk) = rx.recv().await {
            contents.push(chunk.content.as_str().unwrap().to_string());
        }
        assert_eq!(contents, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn stream_failure_ends_with_error_chunk() {
        let dispatcher = dispatcher_with(&[("boom", "FailNTimesOp(failures=5)", true)]);
        let mut rx = dispatcher
            .execute_stream("boom", OpArgs::new(), InvokeMode::Http)
            .unwrap();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            last = Some(chunk);
        }
        let last = last.expect("an error chunk before close");
        assert_eq!(last.kind, stream_chunk::ChunkKind::Error);
    }

    #[tokio::test]
    async fn strict_mode_rejects_unknown_and_missing_fields() {
        register_demo_ops();
        let service = ServiceHandles::new(ServiceConfig::default());
        let mut dispatcher = Dispatcher::new(service);
        let flow = Flow::new("demo", parse_flow("EchoOp()").unwrap())
            .with_input_schema(schema(&[("text", ParamType::String, true)]));
        dispatcher.register_flow(flow).unwrap();

        let err = dispatcher
            .execute(
                "demo",
                kwargs(&[("text", json!("x")), ("extra", json!(1))]),
                InvokeMode::Mcp,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InputValidation(_)));

        let err = dispatcher
            .execute("demo", OpArgs::new(), InvokeMode::Mcp)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InputValidation(_)));

        // HTTP mode passes unknown fields through.
        let response = dispatcher
            .execute(
                "demo",
                kwargs(&[("text", json!("x")), ("extra", json!(1))]),
                InvokeMode::Http,
            )
            .await
            .unwrap();
        assert_eq!(response.answer, "echo: x");
    }

    #[tokio::test]
    async fn type_mismatch_is_validation_error() {
        register_demo_ops();
        let service = ServiceHandles::new(ServiceConfig::default());
        let mut dispatcher = Dispatcher::new(service);
        let flow = Flow::new("demo", parse_flow("EchoOp()").unwrap())
            .with_input_schema(schema(&[("text", ParamType::String, true)]));
        dispatcher.register_flow(flow).unwrap();
        let err = dispatcher
            .execute("demo", kwargs(&[("text", json!(5))]), InvokeMode::Http)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InputValidation(_)));
    }

    #[tokio::test]
    async fn duplicate_flow_name_rejected() {
        let mut dispatcher = dispatcher_with(&[("demo", "EchoOp()", false)]);
        let err = dispatcher
            .register_flow(Flow::new("demo", parse_flow("EchoOp()").unwrap()))
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateRegistration { .. }));
    }
}
