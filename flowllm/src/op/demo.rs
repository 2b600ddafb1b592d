//! Demo ops: small, dependency-free ops used by the default cmd-backend
//! config, the examples in the docs, and the end-to-end tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_chunk::StreamChunk;

use crate::context::Context;
use crate::error::FlowError;
use crate::op::{arg_f64, arg_u64, Op, OpArgs, OpBase, ParamAttrs, ParamType, ToolCall};
use crate::registry::Registry;

/// Writes `"echo: " + ctx["text"]` into the response answer.
pub struct EchoOp {
    base: OpBase,
}

impl EchoOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        Ok(Self {
            base: OpBase::new("EchoOp", args)?,
        })
    }
}

#[async_trait]
impl Op for EchoOp {
    fn base(&self) -> &OpBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }
    async fn async_execute(&self, ctx: &Context, _inputs: &OpArgs) -> Result<Value, FlowError> {
        let text = ctx
            .get("text")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let answer = format!("echo: {text}");
        ctx.set_answer(answer.clone());
        Ok(Value::String(answer))
    }
    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
        })
    }
}

/// Reads `n`, writes `n = n + 1`.
pub struct AddOneOp {
    base: OpBase,
}

impl AddOneOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let base = OpBase::new("AddOneOp", args)?.with_tool_call(
            ToolCall::new("increment n")
                .with_input("n", ParamAttrs::required(ParamType::Integer))
                .with_output("n", ParamAttrs::optional(ParamType::Integer)),
        );
        Ok(Self { base })
    }
}

#[async_trait]
impl Op for AddOneOp {
    fn base(&self) -> &OpBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }
    async fn async_execute(&self, _ctx: &Context, inputs: &OpArgs) -> Result<Value, FlowError> {
        let n = inputs
            .get("n")
            .and_then(Value::as_i64)
            .ok_or_else(|| FlowError::InputValidation("n must be an integer".into()))?;
        Ok(json!(n + 1))
    }
    fn default_output(&self) -> Value {
        json!(0)
    }
    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
        })
    }
}

/// Reads `text` (suffixed by `tool_index`), writes `len` likewise.
pub struct LenOp {
    base: OpBase,
    /// Extra latency per call, to make parallel overlap observable in tests.
    delay: Duration,
}

impl LenOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let delay = arg_f64(&args, "delay_s")?
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::ZERO);
        let base = OpBase::new("LenOp", args)?.with_tool_call(
            ToolCall::new("length of text")
                .with_input("text", ParamAttrs::required(ParamType::String))
                .with_output("len", ParamAttrs::optional(ParamType::Integer)),
        );
        Ok(Self { base, delay })
    }
}

#[async_trait]
impl Op for LenOp {
    fn base(&self) -> &OpBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }
    async fn async_execute(&self, _ctx: &Context, inputs: &OpArgs) -> Result<Value, FlowError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let text = inputs
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!(text.chars().count()))
    }
    fn default_output(&self) -> Value {
        json!(0)
    }
    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
            delay: self.delay,
        })
    }
}

/// Emits answer chunks `"1"`, `"2"`, `"3"` into the stream outbox.
pub struct CountStreamOp {
    base: OpBase,
    count: u64,
}

impl CountStreamOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let count = arg_u64(&args, "count")?.unwrap_or(3);
        Ok(Self {
            base: OpBase::new("CountStreamOp", args)?,
            count,
        })
    }
}

#[async_trait]
impl Op for CountStreamOp {
    fn base(&self) -> &OpBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }
    async fn async_execute(&self, ctx: &Context, _inputs: &OpArgs) -> Result<Value, FlowError> {
        let mut all = String::new();
        for i in 1..=self.count {
            ctx.emit(StreamChunk::answer(i.to_string())).await?;
            all.push_str(&i.to_string());
        }
        ctx.set_answer(all.clone());
        Ok(Value::String(all))
    }
    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
            count: self.count,
        })
    }
}

/// Sleeps `sleep_s` seconds (default 2), then answers `"done"`. Exists to
/// exercise deadlines and cancellation.
pub struct SlowOp {
    base: OpBase,
    sleep: Duration,
}

impl SlowOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let sleep = arg_f64(&args, "sleep_s")?
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(2));
        Ok(Self {
            base: OpBase::new("SlowOp", args)?,
            sleep,
        })
    }
}

#[async_trait]
impl Op for SlowOp {
    fn base(&self) -> &OpBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }
    async fn async_execute(&self, ctx: &Context, _inputs: &OpArgs) -> Result<Value, FlowError> {
        tokio::time::sleep(self.sleep).await;
        ctx.set_answer("done");
        Ok(json!("done"))
    }
    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
            sleep: self.sleep,
        })
    }
}

/// Fails with a transient error `failures` times per instance, then answers.
pub struct FailNTimesOp {
    base: OpBase,
    failures: u64,
    attempts: Arc<AtomicUsize>,
}

impl FailNTimesOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let failures = arg_u64(&args, "failures")?.unwrap_or(1);
        Ok(Self {
            base: OpBase::new("FailNTimesOp", args)?,
            failures,
            attempts: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Op for FailNTimesOp {
    fn base(&self) -> &OpBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }
    async fn async_execute(&self, ctx: &Context, _inputs: &OpArgs) -> Result<Value, FlowError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        if attempt <= self.failures {
            return Err(FlowError::transient(format!(
                "scripted failure {attempt}/{}",
                self.failures
            )));
        }
        ctx.set_answer("recovered");
        Ok(json!("recovered"))
    }
    fn default_output(&self) -> Value {
        json!("fallback")
    }
    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
            failures: self.failures,
            attempts: self.attempts.clone(),
        })
    }
}

/// Blocking op (`async_mode=false`): reverses `text` on the worker pool.
pub struct ReverseOp {
    base: OpBase,
}

impl ReverseOp {
    pub fn new(args: OpArgs) -> Result<Self, FlowError> {
        let base = OpBase::new("ReverseOp", args)?
            .with_async_mode(false)
            .with_tool_call(
                ToolCall::new("reverse text")
                    .with_input("text", ParamAttrs::required(ParamType::String))
                    .with_output("reversed", ParamAttrs::optional(ParamType::String)),
            );
        Ok(Self { base })
    }
}

#[async_trait]
impl Op for ReverseOp {
    fn base(&self) -> &OpBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }
    fn execute(&self, ctx: &Context, inputs: &OpArgs) -> Result<Value, FlowError> {
        if ctx.is_cancelled() {
            return Err(FlowError::cancelled("reverse op observed cancellation"));
        }
        let text = inputs
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!(text.chars().rev().collect::<String>()))
    }
    fn copy_op(&self) -> Box<dyn Op> {
        Box::new(Self {
            base: self.base.clone(),
        })
    }
}

/// Registers every demo op on the global registry. Safe to call repeatedly.
pub fn register_demo_ops() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let registry = Registry::global();
        let results = [
            registry.register_op("EchoOp", Arc::new(|args| {
                Ok(Box::new(EchoOp::new(args)?) as Box<dyn Op>)
            })),
            registry.register_op("AddOneOp", Arc::new(|args| {
                Ok(Box::new(AddOneOp::new(args)?) as Box<dyn Op>)
            })),
            registry.register_op("LenOp", Arc::new(|args| {
                Ok(Box::new(LenOp::new(args)?) as Box<dyn Op>)
            })),
            registry.register_op("CountStreamOp", Arc::new(|args| {
                Ok(Box::new(CountStreamOp::new(args)?) as Box<dyn Op>)
            })),
            registry.register_op("SlowOp", Arc::new(|args| {
                Ok(Box::new(SlowOp::new(args)?) as Box<dyn Op>)
            })),
            registry.register_op("FailNTimesOp", Arc::new(|args| {
                Ok(Box::new(FailNTimesOp::new(args)?) as Box<dyn Op>)
            })),
            registry.register_op("ReverseOp", Arc::new(|args| {
                Ok(Box::new(ReverseOp::new(args)?) as Box<dyn Op>)
            })),
        ];
        for result in results {
            if let Err(err) = result {
                tracing::error!(error = %err, "demo op registration failed");
            }
        }
    });
}
