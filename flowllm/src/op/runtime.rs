//! The op runtime: executes one invocation of one op.
//!
//! Both entry points run the same lifecycle:
//!
//! 1. merge kwargs into the context
//! 2. bind the input dict (tool schema or raw kwargs)
//! 3. cache probe under the fingerprint build lock
//! 4. execute with retries (transient errors and local timeouts retry;
//!    cancellation and deterministic errors do not)
//! 5. on exhaustion: raise, or fall back to the default output
//! 6. write outputs back (context + response extras, `save_answer`)
//! 7. cache store (skipped for cache hits and default fallbacks)
//! 8. return the output
//!
//! After a cancellation nothing past step 4 runs. Blocking bodies are handed
//! to the worker pool as a deep copy of the op; combinator nodes always
//! coordinate on the cooperative tier regardless of their declared mode.

use serde_json::Value;

use crate::cache::{canonicalize, fingerprint};
use crate::context::Context;
use crate::error::FlowError;
use crate::op::{Combinator, Op, OpArgs};

/// Executes one op against the shared invocation context (cooperative entry).
pub async fn invoke(op: &dyn Op, ctx: &Context, kwargs: OpArgs) -> Result<Value, FlowError> {
    if ctx.is_cancelled() {
        return Err(FlowError::cancelled(format!(
            "op `{}` not started: invocation cancelled",
            op.name()
        )));
    }

    // 1. Bind kwargs into the shared context under their argument names.
    for (key, value) in &kwargs {
        ctx.insert(key.clone(), value.clone());
    }

    // 2. Input dict: declared schema inputs for tool ops, raw kwargs otherwise.
    let inputs = match op.tool_call() {
        Some(tool_call) => tool_call.bind_inputs(ctx, op.name())?,
        None => kwargs,
    };

    // 3. Cache probe. The build lock is held through execute and store so
    // concurrent duplicate invocations run the body exactly once.
    let policy = op.cache_policy();
    let mut build_guard = None;
    let cache_key = if policy.enabled {
        let key = fingerprint(op.name(), &inputs);
        build_guard = Some(ctx.service().cache_locks().acquire(&key).await);
        if let Some(hit) = ctx.cache().get(&key).await {
            tracing::debug!(op = %op.name(), key = %key, "op cache hit");
            return Ok(hit);
        }
        Some(key)
    } else {
        None
    };

    // 4. Execute with retries.
    let max_retries = op.max_retries().max(1);
    let mut last_error: Option<FlowError> = None;
    let mut output: Option<Value> = None;
    for attempt in 1..=max_retries {
        match run_attempt(op, ctx, &inputs).await {
            Ok(value) => {
                output = Some(value);
                break;
            }
            Err(err @ FlowError::Cancelled(_)) => {
                // No cleanup after a cancellation.
                tracing::debug!(op = %op.name(), attempt, "op cancelled");
                return Err(err);
            }
            Err(err) if err.is_retryable() && attempt < max_retries => {
                tracing::warn!(op = %op.name(), attempt, error = %err, "retrying op");
                last_error = Some(err);
            }
            Err(err) => {
                last_error = Some(err);
                break;
            }
        }
    }

    // 5. Exhaustion policy.
    let (value, output_is_default) = match output {
        Some(value) => (value, false),
        None => {
            let err = last_error
                .unwrap_or_else(|| FlowError::op_failed(format!("op `{}` never ran", op.name())));
            if op.raise_on_failure() {
                return Err(err);
            }
            tracing::warn!(op = %op.name(), error = %err, "all attempts failed; using default output");
            (op.default_output(), true)
        }
    };

    // 6. After-execute: write outputs back into the shared state.
    if let Some(tool_call) = op.tool_call() {
        tool_call.write_outputs(ctx, op.name(), &value);
    }
    if op.save_answer() {
        ctx.set_answer(stable_answer(&value));
    }

    // 7. Cache store: only real executions are materialized.
    if let (Some(key), false) = (&cache_key, output_is_default) {
        if let Err(err) = ctx.cache().set(key, value.clone(), policy.expire).await {
            tracing::warn!(op = %op.name(), error = %err, "op cache store failed");
        }
    }
    drop(build_guard);

    Ok(value)
}

/// Blocking entry point, for op bodies that need to call back into the
/// runtime from the worker pool. Must not be called on a runtime core thread.
pub fn invoke_blocking(op: &dyn Op, ctx: &Context, kwargs: OpArgs) -> Result<Value, FlowError> {
    tokio::runtime::Handle::current().block_on(invoke(op, ctx, kwargs))
}

/// One attempt: cooperative bodies run inline under the cancellation token;
/// blocking bodies cross to the worker pool as a deep copy.
async fn run_attempt(op: &dyn Op, ctx: &Context, inputs: &OpArgs) -> Result<Value, FlowError> {
    if op.combinator() != Combinator::Leaf || op.async_mode() {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                Err(FlowError::cancelled(format!("op `{}` cancelled", op.name())))
            }
            result = op.async_execute(ctx, inputs) => result,
        }
    } else {
        let copy = op.copy_op();
        let ctx_for_body = ctx.clone();
        let inputs_for_body = inputs.clone();
        ctx.worker_pool()
            .submit_blocking(ctx.cancellation(), move || {
                copy.execute(&ctx_for_body, &inputs_for_body)
            })
            .await
    }
}

/// `response.answer` form of an output: strings verbatim, everything else as
/// stable (key-sorted) JSON.
fn stable_answer(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(&canonicalize(other)).unwrap_or_default(),
    }
}
