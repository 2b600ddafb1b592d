//! Shared helpers: spawn the HTTP service on an ephemeral port with the demo
//! flows registered, return its base url.

use std::sync::Arc;

use flowllm::flow::parser::parse_flow;
use flowllm::op::demo::register_demo_ops;
use flowllm::{Dispatcher, Flow, ServiceHandles};
use tokio::net::TcpListener;

pub async fn spawn_server() -> String {
    register_demo_ops();
    let service = ServiceHandles::new(config::ServiceConfig::default());
    let mut dispatcher = Dispatcher::new(service);

    let flows = [
        ("demo_echo", "EchoOp()", false),
        ("inc3", "AddOneOp() >> AddOneOp() >> AddOneOp()", false),
        ("lens", "LenOp(tool_index=1) | LenOp(tool_index=2)", false),
        ("count", "CountStreamOp()", true),
        ("boom_stream", "FailNTimesOp(failures=9)", true),
        ("slow", "SlowOp(sleep_s=2.0)", false),
    ];
    for (name, expr, stream) in flows {
        dispatcher
            .register_flow(Flow::new(name, parse_flow(expr).unwrap()).with_stream(stream))
            .unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve::run_on_listener(Arc::new(dispatcher), listener));
    format!("http://{addr}")
}
