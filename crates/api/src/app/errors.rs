use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use parley_core::EventError;

pub fn json_error(status: StatusCode, reason: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "status": "error",
            "reason": reason.into(),
        })),
    )
        .into_response()
}

pub fn event_error_to_response(err: EventError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, err.to_string())
}
