//! Cross-module execution properties: combinator ordering, parallel
//! cancellation, and visibility guarantees.

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use flowllm::flow::parser::parse_flow;
use flowllm::op::demo::register_demo_ops;
use flowllm::op::runtime;
use flowllm::{
    Context, Dispatcher, Flow, InvokeMode, OpArgs, ParallelOp, Registry, ServiceHandles,
};

fn kwargs(pairs: &[(&str, Value)]) -> OpArgs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn test_context() -> Context {
    Context::new(
        ServiceHandles::new(config::ServiceConfig::default()),
        json!({}),
        Duration::from_secs(30),
        None,
    )
}

/// **Scenario**: Sequential happens-before — every write of child `i` is
/// visible to child `i+1`.
#[tokio::test]
async fn sequential_writes_are_visible_downstream() {
    register_demo_ops();
    let op = parse_flow("AddOneOp() >> AddOneOp() >> AddOneOp()").unwrap();
    let ctx = test_context();
    let out = runtime::invoke(op.as_ref(), &ctx, kwargs(&[("n", json!(0))]))
        .await
        .unwrap();
    assert_eq!(out, json!(3));
    assert_eq!(ctx.get("n"), Some(json!(3)));
}

/// **Scenario**: Sequential fails fast — children after the failing one
/// never start.
#[tokio::test]
async fn sequential_fails_fast() {
    register_demo_ops();
    let op = parse_flow("FailNTimesOp(failures=5) >> AddOneOp()").unwrap();
    let ctx = test_context();
    ctx.insert("n", json!(0));
    let err = runtime::invoke(op.as_ref(), &ctx, OpArgs::new())
        .await
        .unwrap_err();
    assert!(matches!(err, flowllm::FlowError::Transient(_)));
    // AddOneOp never ran: n untouched.
    assert_eq!(ctx.get("n"), Some(json!(0)));
}

/// **Scenario**: Parallel children genuinely overlap (latencies do not add).
#[tokio::test]
async fn parallel_children_overlap() {
    register_demo_ops();
    let op = parse_flow(
        "LenOp(tool_index=1, delay_s=0.15) | LenOp(tool_index=2, delay_s=0.15)",
    )
    .unwrap();
    let ctx = test_context();
    ctx.insert("text_1", json!("ab"));
    ctx.insert("text_2", json!("xyz"));

    let started = Instant::now();
    let out = runtime::invoke(op.as_ref(), &ctx, OpArgs::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(out, json!([2, 3]), "aggregated in declared child order");
    assert_eq!(ctx.get("len_1"), Some(json!(2)));
    assert_eq!(ctx.get("len_2"), Some(json!(3)));
    assert!(
        elapsed < Duration::from_millis(280),
        "children ran sequentially: {elapsed:?}"
    );
}

/// **Scenario**: A sibling failure cancels the other children; after the
/// combinator returns, nothing is still running.
#[tokio::test]
async fn parallel_sibling_failure_cancels_the_rest() {
    register_demo_ops();
    let op = parse_flow("FailNTimesOp(failures=5) | SlowOp(sleep_s=0.3)").unwrap();
    let ctx = test_context();
    let err = runtime::invoke(op.as_ref(), &ctx, OpArgs::new())
        .await
        .unwrap_err();
    assert!(matches!(err, flowllm::FlowError::Transient(_)), "got {err}");

    // SlowOp writes "done" on completion; a cancelled sibling never does,
    // even well past its sleep.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_ne!(ctx.answer(), "done", "sibling kept running after failure");
}

/// **Scenario**: Parallel with raise_on_failure=false keeps completed results
/// and substitutes defaults for failed children.
#[tokio::test]
async fn parallel_collects_defaults_when_not_raising() {
    register_demo_ops();
    let registry = Registry::global();
    let failing = registry
        .build_op("FailNTimesOp", kwargs(&[("failures", json!(5))]))
        .unwrap();
    let counting = registry.build_op("LenOp", kwargs(&[("tool_index", json!(1))])).unwrap();
    let op = ParallelOp::new(vec![failing, counting])
        .unwrap()
        .with_raise_on_failure(false);

    let ctx = test_context();
    ctx.insert("text_1", json!("abcd"));
    let out = runtime::invoke(&op, &ctx, OpArgs::new()).await.unwrap();
    // FailNTimesOp's default output, then LenOp's real result, in order.
    assert_eq!(out, json!(["fallback", 4]));
}

/// **Scenario**: Zero children is illegal for both combinators.
#[test]
fn empty_combinators_are_rejected() {
    use flowllm::{CompositionError, SequentialOp};
    assert!(matches!(
        SequentialOp::new(vec![]),
        Err(CompositionError::Empty("Sequential"))
    ));
    assert!(matches!(
        ParallelOp::new(vec![]),
        Err(CompositionError::Empty("Parallel"))
    ));
}

/// **Scenario**: A whole blocking pipeline runs through the worker pool.
#[tokio::test]
async fn blocking_flow_through_dispatcher() {
    register_demo_ops();
    let service = ServiceHandles::new(config::ServiceConfig::default());
    let mut dispatcher = Dispatcher::new(service);
    dispatcher
        .register_flow(Flow::new("rev", parse_flow("ReverseOp()").unwrap()))
        .unwrap();
    let response = dispatcher
        .execute("rev", kwargs(&[("text", json!("flow"))]), InvokeMode::Cli)
        .await
        .unwrap();
    assert_eq!(response.extra["reversed"], json!("wolf"));
}

/// **Scenario**: Deadline cancellation leaves no lingering work shortly after.
#[tokio::test]
async fn deadline_cancellation_settles_quickly() {
    register_demo_ops();
    let service = ServiceHandles::new(config::ServiceConfig::default());
    let mut dispatcher = Dispatcher::new(service.clone());
    dispatcher
        .register_flow(Flow::new("slow", parse_flow("SlowOp(sleep_s=2.0)").unwrap()))
        .unwrap();
    let err = dispatcher
        .execute(
            "slow",
            kwargs(&[("timeout_ms", json!(100))]),
            InvokeMode::Http,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, flowllm::FlowError::Timeout(_)));
    // The worker pool has every permit back shortly after the deadline.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        service.worker_pool().available(),
        service.worker_pool().max_workers()
    );
}
