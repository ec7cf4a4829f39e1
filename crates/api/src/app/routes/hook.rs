use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use parley_core::RawEvent;
use parley_infra::GatewayStatus;

use crate::app::errors::event_error_to_response;
use crate::app::services::AppServices;

/// Webhook intake. The body is read raw so that decoding failures get the same
/// `{status, reason}` shape as every other answer.
pub async fn chatwoot_hook(Extension(services): Extension<Arc<AppServices>>, body: Bytes) -> Response {
    let event = match RawEvent::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "rejecting malformed webhook body");
            return event_error_to_response(e);
        }
    };

    let response = services.gateway.handle(&event).await;
    let status = match response.status {
        GatewayStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(response)).into_response()
}
