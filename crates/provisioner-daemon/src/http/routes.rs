use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::auth::{require_bearer_token, AuthState};
use super::record_request::record_request;
use super::handlers;
use super::AppState;

pub fn build_router(state: AppState, auth: AuthState) -> Router {
    Router::new()
        .route("/api/v1/provision", post(handlers::provision))
        .route("/api/v1/status/:job_id", get(handlers::status))
        .route("/api/v1/cancel/:job_id", delete(handlers::cancel))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer_token))
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::health))
        .route("/livez", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // `route_layer`, not `layer`: it runs after route matching, so the
        // `MatchedPath` extension this middleware reads is already present.
        .route_layer(middleware::from_fn_with_state(state.clone(), record_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
