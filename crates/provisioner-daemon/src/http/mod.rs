//! HTTP surface (C8, `spec.md` §6). Built on `axum` + `tower-http`, the
//! async-HTTP-server idiom visible across the retrieval pack (e.g.
//! `localplatform-backup-server`'s `axum`/`tower`/`tracing-subscriber`
//! stack) since the teacher itself has no HTTP surface to imitate.

pub mod auth;
pub mod handlers;
mod record_request;
pub mod routes;

use std::sync::Arc;

use provisioner_core::job::JobManager;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub metrics: Arc<Metrics>,
}

pub use routes::build_router;
