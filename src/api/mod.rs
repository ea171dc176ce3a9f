pub mod auth;
pub mod chat;
pub mod extract;
pub mod state;
pub mod middleware;

pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
    timeout::TimeoutLayer,
};
use std::time::Duration;
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub fn create_router(state: AppState) -> Router {
    // A chat request may create a session and send twice before answering.
    let timeout = Duration::from_secs(state.config.request_timeout_secs * 3);

    let protected = Router::new()
        .route("/me", get(auth::me))
        .route("/chat", post(chat::chat))
        .route("/chat/restart", post(chat::restart_chat))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        // Health check
        .route("/health", get(health))

        // Authentication endpoints
        .route("/signup", post(auth::signup))
        .route("/signin", post(auth::signin))

        // Test identity endpoints (unauthenticated)
        .route("/test", get(chat::test))
        .route("/restartSession", post(chat::restart_session))

        .merge(protected)
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
