//! Route handlers (`spec.md` §6). Never leak internal error types: every
//! failure is mapped to the documented status code and a small JSON body.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use provisioner_core::error::{AdmissionError, ManagerError};
use provisioner_core::job::{ImageFormat, JobRecord, ProvisionRequest};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ProvisionRequestBody {
    pub image_url: String,
    pub volume_name: String,
    pub volume_size_gb: i64,
    pub image_type: String,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub async fn provision(
    State(state): State<AppState>,
    Json(body): Json<ProvisionRequestBody>,
) -> Response {
    let image_format = match ImageFormat::parse(&body.image_type) {
        Some(f) => f,
        None => {
            let err = AdmissionError::InvalidImageType(body.image_type);
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: err.to_string() })).into_response();
        }
    };

    let request = ProvisionRequest {
        image_url: body.image_url,
        volume_name: body.volume_name,
        volume_size_gib: body.volume_size_gb,
        image_format,
        correlation_id: body.correlation_id,
    };

    match state.manager.submit(request).await {
        Ok(result) => {
            state.metrics.jobs_total.with_label_values(&["started"]).inc();
            (StatusCode::ACCEPTED, Json(ProvisionResponse { job_id: result.job_id })).into_response()
        }
        Err(ManagerError::Admission(e)) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub job_id: String,
    pub status: &'static str,
    pub progress: Option<ProgressView>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ProgressView {
    pub stage: &'static str,
    pub percent: u8,
    pub bytes_processed: u64,
    pub bytes_total: u64,
}

impl From<JobRecord> for StatusView {
    fn from(record: JobRecord) -> Self {
        let completed = record.status.is_terminal() && record.cache_hit.is_some();
        StatusView {
            job_id: record.job_id,
            status: record.status.as_str(),
            progress: record.progress.map(|p| ProgressView {
                stage: p.stage.as_str(),
                percent: p.percent,
                bytes_processed: p.bytes_processed,
                bytes_total: p.bytes_total,
            }),
            error_message: record.error_message,
            cache_hit: if completed { record.cache_hit } else { None },
            image_path: if completed { record.image_path } else { None },
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
        }
    }
}

pub async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.manager.get_status(&job_id).await {
        Ok(record) => (StatusCode::OK, Json(StatusView::from(record))).into_response(),
        Err(ManagerError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse { error: format!("job not found: {job_id}") })).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
    pub job_id: String,
}

pub async fn cancel(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.manager.cancel(&job_id).await {
        Ok(()) => (StatusCode::OK, Json(CancelResponse { status: "cancelled", job_id })).into_response(),
        Err(ManagerError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse { error: format!("job not found: {job_id}") })).into_response()
        }
        Err(ManagerError::NotCancellable(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: format!("job {job_id} is not in a cancellable state") }),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_jobs: usize,
    pub concurrency_ceiling: usize,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let active = state.manager.active_job_count();
    let ceiling = state.manager.concurrency_ceiling();
    let status = if active > ceiling { "degraded" } else { "healthy" };
    (StatusCode::OK, Json(HealthResponse { status, active_jobs: active, concurrency_ceiling: ceiling })).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    state.metrics.active_jobs.set(state.manager.active_job_count() as i64);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
        .into_response()
}
