//! HTTP service for FlowLLM.
//!
//! `GET /health`, `GET /openapi.json` (also `/docs`), and `POST /{flow_name}`
//! for every registered flow — JSON in, JSON out for plain flows,
//! `text/event-stream` for stream flows. CORS is permissive. Errors map per
//! the taxonomy: validation 400, unknown flow 404, timeout 408, cancelled
//! 499, everything else 500 with a stable error code in the body.

mod app;
mod error;
mod schema;

pub use app::router;

use std::sync::Arc;

use flowllm::Dispatcher;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("serve: {0}")]
    Serve(std::io::Error),
}

/// Binds the configured HTTP address and serves until ctrl-c.
pub async fn run_http_service(dispatcher: Arc<Dispatcher>) -> Result<(), ServeError> {
    let http = &dispatcher.service().config().http;
    let addr = format!("{}:{}", http.host, http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(addr = %addr, "http service listening");
    run_on_listener(dispatcher, listener).await
}

/// Serves on an already-bound listener (tests bind port 0 and pass it in).
pub async fn run_on_listener(
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
) -> Result<(), ServeError> {
    let router = app::router(dispatcher);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServeError::Serve)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
