use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": services.service_name,
        "version": services.version,
    }))
}

pub async fn ready(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let readiness = services.gateway.readiness().await;
    let (code, status) = if readiness.ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(json!({
            "status": status,
            "checks": readiness,
        })),
    )
}
