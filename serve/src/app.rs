//! Axum app: state, router, and the per-flow invoke handler.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use flowllm::{Dispatcher, FlowError, InvokeMode, OpArgs};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;

use crate::error::error_response;
use crate::schema::openapi_document;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) dispatcher: Arc<Dispatcher>,
}

/// One route per concern: health, schema, and `POST /{flow_name}` for every
/// registered flow (non-stream JSON or SSE, decided by the flow).
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState { dispatcher };
    Router::new()
        .route("/health", get(health))
        .route("/openapi.json", get(openapi))
        .route("/docs", get(openapi))
        .route("/:flow_name", post(invoke_flow))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn openapi(State(state): State<AppState>) -> Json<Value> {
    Json(openapi_document(&state.dispatcher))
}

async fn invoke_flow(
    Path(flow_name): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let kwargs: OpArgs = match body {
        Value::Object(map) => map,
        other => {
            return error_response(&FlowError::InputValidation(format!(
                "request body must be a JSON object, got {other}"
            )))
        }
    };

    let Some(flow) = state.dispatcher.get(&flow_name) else {
        return error_response(&FlowError::UnknownFlow(flow_name));
    };

    if flow.stream() {
        return stream_response(&state.dispatcher, &flow_name, kwargs);
    }

    match state
        .dispatcher
        .execute(&flow_name, kwargs, InvokeMode::Http)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            tracing::warn!(flow = %flow_name, error = %err, "flow invocation failed");
            error_response(&err)
        }
    }
}

/// SSE response for a stream flow: one `data:` event per chunk, in emission
/// order, with the terminal `[DONE]` appended exactly once after the outbox
/// closes.
fn stream_response(dispatcher: &Dispatcher, flow_name: &str, kwargs: OpArgs) -> Response {
    let rx = match dispatcher.execute_stream(flow_name, kwargs, InvokeMode::Http) {
        Ok(rx) => rx,
        Err(err) => return error_response(&err),
    };
    let chunks = ReceiverStream::new(rx)
        .map(|chunk| Ok::<Event, Infallible>(Event::default().data(chunk.sse_data())))
        .chain(futures::stream::once(async {
            Ok(Event::default().data("[DONE]"))
        }));
    Sse::new(chunks).into_response()
}
