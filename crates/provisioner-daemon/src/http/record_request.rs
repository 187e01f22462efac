//! Per-request metrics middleware, applied ahead of every route (including
//! the unauthenticated `/health`/`/metrics` group) so `provisioner_http_requests_total`
//! reflects every request the daemon actually served.

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::AppState;

pub async fn record_request(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &endpoint, response.status().as_str()])
        .inc();

    response
}
