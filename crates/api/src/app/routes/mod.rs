use axum::{
    routing::{get, post},
    Router,
};

pub mod hook;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .route("/chatwoot-hook", post(hook::chatwoot_hook))
        .route("/health", get(system::health))
        .route("/ready", get(system::ready))
}
