//! Flow errors to HTTP responses: status per the error taxonomy, a stable
//! error code plus message in the JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowllm::FlowError;
use serde_json::json;

/// Client-closed-request; nginx's convention, no `http` constant exists.
const CLIENT_CLOSED_REQUEST: u16 = 499;

pub(crate) fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::InputValidation(_) | FlowError::MissingInput { .. } => StatusCode::BAD_REQUEST,
        FlowError::UnknownFlow(_) => StatusCode::NOT_FOUND,
        FlowError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        FlowError::Cancelled(_) => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(err: &FlowError) -> Response {
    let status = status_for(err);
    let body = Json(json!({
        "error": err.code(),
        "message": err.to_string(),
    }));
    (status, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_statuses() {
        assert_eq!(
            status_for(&FlowError::InputValidation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&FlowError::UnknownFlow("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&FlowError::Timeout("x".into())),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(status_for(&FlowError::cancelled("x")).as_u16(), 499);
        assert_eq!(
            status_for(&FlowError::transient("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&FlowError::op_failed("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
