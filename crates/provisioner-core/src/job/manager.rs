//! Job manager (C7): admission, the worker pipeline, cancellation, recovery,
//! and housekeeping. "The core of the core" (`spec.md` §4.7).
//!
//! Grounded on `ddm-core::scheduler`'s `setup → run_download → finish`
//! pipeline shape and its `JobAborted` unwind via `control::JobControl`'s
//! abort token, generalized from "segment download" to "checksum → cache →
//! volume → populate → finalize." The semaphore-bounded concurrency ceiling
//! is the async analogue of the teacher's `GlobalConnectionBudget`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, Semaphore};
use uuid::Uuid;

use crate::blockstorage::BlockStorageDriver;
use crate::cache::checksum::{is_valid_checksum, sanitize_token};
use crate::cache::ImageCache;
use crate::cancel::{CancelCause, CancelToken};
use crate::config::CoreConfig;
use crate::error::{AdmissionError, ManagerError};
use crate::objectstore::ObjectStoreClient;

use super::store::{JobStore, ListFilter};
use super::types::{JobRecord, JobStatus, Progress, ProvisionRequest, Stage};

/// Bound on the in-memory terminal-job table (`spec.md` §4.7 Housekeeping).
const MAX_TERMINAL_JOBS_RETAINED: usize = 100;

/// Notified with the terminal status whenever a job finishes
/// (`spec.md` §6's `jobs_total{status}` counter). The daemon is the only
/// caller that needs this; the core crate stays ignorant of `prometheus`.
pub type JobObserver = Arc<dyn Fn(JobStatus) + Send + Sync>;

/// Collaborators the manager depends on, constructed once at daemon startup
/// and plumbed in explicitly (`spec.md` §9: "no ambient access").
pub struct JobManagerDeps {
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub block_storage: Arc<dyn BlockStorageDriver>,
    pub cache: Arc<ImageCache>,
    pub store: JobStore,
    pub config: CoreConfig,
    pub job_observer: Option<JobObserver>,
}

/// Result of a successful admission (`spec.md` §4.7 Admission).
#[derive(Debug, Clone)]
pub struct AdmissionResult {
    pub job_id: String,
}

struct JobHandle {
    record: Arc<RwLock<JobRecord>>,
    cancel: CancelToken,
}

/// Orchestrates the provisioning pipeline for every accepted request.
pub struct JobManager {
    object_store: Arc<dyn ObjectStoreClient>,
    block_storage: Arc<dyn BlockStorageDriver>,
    cache: Arc<ImageCache>,
    store: JobStore,
    config: CoreConfig,
    permits: Arc<Semaphore>,
    jobs: Arc<RwLock<HashMap<String, JobHandle>>>,
    terminal_order: Arc<Mutex<VecDeque<String>>>,
    job_observer: Option<JobObserver>,
}

impl JobManager {
    pub fn new(deps: JobManagerDeps) -> Arc<Self> {
        Arc::new(Self {
            object_store: deps.object_store,
            block_storage: deps.block_storage,
            cache: deps.cache,
            store: deps.store,
            permits: Arc::new(Semaphore::new(deps.config.max_concurrent_jobs)),
            config: deps.config,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            terminal_order: Arc::new(Mutex::new(VecDeque::new())),
            job_observer: deps.job_observer,
        })
    }

    /// Flip any `pending`/`running` records left over from a previous
    /// process. Must run before the listener binds (`spec.md` §4.7 Recovery).
    pub async fn recover(&self) -> Result<u64, ManagerError> {
        Ok(self.store.fail_in_progress().await?)
    }

    /// Admission: validates the request, persists a pending record, spawns
    /// the worker, returns immediately (`spec.md` §4.7 Admission).
    pub async fn submit(self: &Arc<Self>, request: ProvisionRequest) -> Result<AdmissionResult, ManagerError> {
        validate_request(&request)?;

        let job_id = Uuid::new_v4().to_string();
        let record = JobRecord::new_pending(job_id.clone(), request);
        self.store.save(&record).await?;

        let cancel = CancelToken::with_deadline(self.config.job_deadline);
        let handle = JobHandle {
            record: Arc::new(RwLock::new(record)),
            cancel: cancel.clone(),
        };
        self.jobs.write().await.insert(job_id.clone(), handle);

        let manager = Arc::clone(self);
        let worker_job_id = job_id.clone();
        tokio::spawn(async move {
            manager.run_worker(worker_job_id, cancel).await;
        });

        Ok(AdmissionResult { job_id })
    }

    /// Permitted only while the job is pending or running.
    pub async fn cancel(&self, job_id: &str) -> Result<(), ManagerError> {
        let jobs = self.jobs.read().await;
        let handle = jobs.get(job_id).ok_or_else(|| ManagerError::NotFound(job_id.to_string()))?;
        {
            let record = handle.record.read().await;
            if record.status.is_terminal() {
                return Err(ManagerError::NotCancellable(job_id.to_string()));
            }
        }
        handle.cancel.cancel(CancelCause::UserRequested);
        let mut record = handle.record.write().await;
        record.fail("job cancelled by user");
        self.store.save(&record).await?;
        Ok(())
    }

    /// In-memory view if present, falling back to the durable store for
    /// jobs admitted by an earlier process.
    pub async fn get_status(&self, job_id: &str) -> Result<JobRecord, ManagerError> {
        if let Some(handle) = self.jobs.read().await.get(job_id) {
            return Ok(handle.record.read().await.clone());
        }
        self.store.get(job_id).await.map_err(|e| match e {
            crate::error::StoreError::NotFound(id) => ManagerError::NotFound(id),
            other => ManagerError::Store(other),
        })
    }

    pub async fn list(&self, filter: ListFilter, limit: i64, offset: i64) -> Result<Vec<JobRecord>, ManagerError> {
        Ok(self.store.list(filter, limit, offset).await?)
    }

    /// Bounds the in-memory job table to the most recent terminal jobs;
    /// durable records are untouched (`spec.md` §4.7 Housekeeping).
    pub async fn cleanup_completed(&self) {
        let mut order = self.terminal_order.lock().await;
        while order.len() > MAX_TERMINAL_JOBS_RETAINED {
            if let Some(oldest) = order.pop_front() {
                self.jobs.write().await.remove(&oldest);
            }
        }
    }

    pub fn active_job_count(&self) -> usize {
        let total = self.config.max_concurrent_jobs;
        total.saturating_sub(self.permits.available_permits())
    }

    pub fn concurrency_ceiling(&self) -> usize {
        self.config.max_concurrent_jobs
    }

    async fn persist(&self, handle: &JobHandle) {
        let record = handle.record.read().await;
        if let Err(e) = self.store.save(&record).await {
            tracing::error!(job_id = %record.job_id, error = %e, "failed to persist job record");
        }
    }

    async fn mark_terminal(&self, job_id: &str) {
        self.terminal_order.lock().await.push_back(job_id.to_string());
        self.cleanup_completed().await;
    }

    async fn set_progress(&self, handle: &JobHandle, stage: Stage, percent: u8, processed: u64, total: u64) {
        let mut record = handle.record.write().await;
        record.set_progress(Progress {
            stage,
            percent,
            bytes_processed: processed,
            bytes_total: total,
        });
    }

    async fn fail(&self, job_id: &str, handle: &JobHandle, message: String) {
        tracing::warn!(job_id, error = %message, "job failed");
        {
            let mut record = handle.record.write().await;
            record.fail(message);
        }
        self.persist(handle).await;
        self.mark_terminal(job_id).await;
        if let Some(observer) = &self.job_observer {
            observer(JobStatus::Failed);
        }
    }

    async fn complete(&self, job_id: &str, handle: &JobHandle, cache_hit: bool, image_path: String) {
        {
            let mut record = handle.record.write().await;
            record.complete(cache_hit, image_path);
        }
        self.persist(handle).await;
        self.mark_terminal(job_id).await;
        if let Some(observer) = &self.job_observer {
            observer(JobStatus::Completed);
        }
    }

    /// The worker pipeline: steps 1-9 of `spec.md` §4.7 in order.
    async fn run_worker(self: Arc<Self>, job_id: String, cancel: CancelToken) {
        let handle = {
            let jobs = self.jobs.read().await;
            match jobs.get(&job_id) {
                Some(h) => JobHandle {
                    record: Arc::clone(&h.record),
                    cancel: h.cancel.clone(),
                },
                None => return,
            }
        };

        // Step 1: acquire permit, racing the deadline/cancel signal.
        let permit = tokio::select! {
            permit = self.permits.acquire() => permit,
            _ = cancel.cancelled() => {
                self.fail(&job_id, &handle, cancellation_message(&cancel)).await;
                return;
            }
        };
        let _permit = match permit {
            Ok(p) => p,
            Err(_) => {
                self.fail(&job_id, &handle, "concurrency semaphore closed".to_string()).await;
                return;
            }
        };

        // Step 2: transition to running.
        {
            let mut record = handle.record.write().await;
            record.transition(JobStatus::Running);
        }
        self.persist(&handle).await;

        if let Err(outcome) = self.run_pipeline(&job_id, &handle, &cancel).await {
            self.fail(&job_id, &handle, outcome).await;
        }
    }

    /// Steps 3-9. Returns `Err(message)` on any terminal failure; the caller
    /// has already exited the job via `fail()` by the time this returns Err
    /// only for the cases that don't themselves call `complete`.
    async fn run_pipeline(&self, job_id: &str, handle: &JobHandle, cancel: &CancelToken) -> Result<(), String> {
        let request = handle.record.read().await.request.clone();

        if cancel.is_cancelled() {
            return Err(cancellation_message(cancel));
        }

        // Step 3: resolve checksum.
        let sidecar_url = format!("{}.sha256", request.image_url);
        let (checksum, content_addressed) = match self.object_store.get_small(&sidecar_url, cancel).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                if is_valid_checksum(&text) {
                    (text, true)
                } else {
                    tracing::warn!(job_id, "sidecar content invalid, falling back to URL-keyed caching");
                    (request.image_url.clone(), false)
                }
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "no sidecar available, falling back to URL-keyed caching");
                (request.image_url.clone(), false)
            }
        };

        if cancel.is_cancelled() {
            return Err(cancellation_message(cancel));
        }

        // Step 4: check cache.
        let cache_lookup = self.cache.lookup(&checksum).map_err(|e| e.to_string())?;
        let (image_path, cache_hit) = if let Some(entry) = cache_lookup {
            (entry.path, true)
        } else {
            if cancel.is_cancelled() {
                return Err(cancellation_message(cancel));
            }
            // Step 5: download.
            let token = sanitize_token(&request.image_url);
            let image_path = self.cache.allocate_path(&token).map_err(|e| e.to_string())?;
            self.set_progress(handle, Stage::Downloading, 10, 0, 0).await;
            self.persist(handle).await;

            let progress_cache = self.cache_progress_closure(handle);
            let download_result = self
                .object_store
                .stream_to(&request.image_url, &image_path, cancel, &progress_cache)
                .await;

            if let Err(e) = download_result {
                self.cache.remove(&image_path);
                return Err(format!("job {job_id} volume {}: download step: {e}", request.volume_name));
            }

            if cancel.is_cancelled() {
                self.cache.remove(&image_path);
                return Err(cancellation_message(cancel));
            }

            // Step 6: commit cache (best-effort).
            let commit_checksum = if content_addressed {
                checksum.clone()
            } else {
                match self.cache.checksum_of(&image_path) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(job_id, error = %e, "failed to compute post-download checksum");
                        checksum.clone()
                    }
                }
            };
            if let Err(e) = self.cache.commit(&image_path, &commit_checksum) {
                tracing::warn!(job_id, error = %e, "cache commit failed; image remains usable for this job only");
            }

            (image_path, false)
        };

        if cancel.is_cancelled() {
            return Err(cancellation_message(cancel));
        }

        // Step 7: create block volume.
        self.set_progress(handle, Stage::CreatingVolume, 50, 0, 0).await;
        self.persist(handle).await;
        if let Err(e) = self.block_storage.create(&request.volume_name, request.volume_size_gib).await {
            return Err(format!("job {job_id} volume {}: create step: {e}", request.volume_name));
        }

        if cancel.is_cancelled() {
            let _ = self.block_storage.delete(&request.volume_name).await;
            return Err(cancellation_message(cancel));
        }

        // Step 8: populate, with rollback on failure.
        self.set_progress(handle, Stage::Converting, 75, 0, 0).await;
        self.persist(handle).await;
        let progress_populate = self.cache_progress_closure(handle);
        let populate_result = self
            .block_storage
            .populate(&image_path, &request.volume_name, request.image_format, cancel, &progress_populate)
            .await;

        if let Err(e) = populate_result {
            let message = match self.block_storage.delete(&request.volume_name).await {
                Ok(()) => format!("job {job_id} volume {}: populate step: {e}", request.volume_name),
                Err(rollback_err) => format!(
                    "job {job_id} volume {}: populate step: {e}; rollback also failed: {rollback_err}",
                    request.volume_name
                ),
            };
            return Err(message);
        }

        if cancel.is_cancelled() {
            let _ = self.block_storage.delete(&request.volume_name).await;
            return Err(cancellation_message(cancel));
        }

        // Step 9: finalize.
        self.set_progress(handle, Stage::Finalizing, 100, 0, 0).await;
        self.complete(job_id, handle, cache_hit, image_path.display().to_string()).await;
        Ok(())
    }

    fn cache_progress_closure(&self, handle: &JobHandle) -> impl Fn(u64, u64) + Send + Sync + '_ {
        let record = Arc::clone(&handle.record);
        move |processed: u64, total: u64| {
            if let Ok(mut guard) = record.try_write() {
                let stage = guard.progress.map(|p| p.stage).unwrap_or(Stage::Downloading);
                let percent = if total > 0 { ((processed * 100) / total).min(100) as u8 } else { 0 };
                guard.set_progress(Progress {
                    stage,
                    percent,
                    bytes_processed: processed,
                    bytes_total: total,
                });
            }
        }
    }
}

fn cancellation_message(cancel: &CancelToken) -> String {
    match cancel.cause() {
        Some(CancelCause::DeadlineExceeded) => "provisioning exceeded the configured deadline".to_string(),
        _ => "job cancelled by user".to_string(),
    }
}

fn validate_request(request: &ProvisionRequest) -> Result<(), AdmissionError> {
    if request.image_url.trim().is_empty() {
        return Err(AdmissionError::EmptyUrl);
    }
    let parsed = url::Url::parse(&request.image_url).map_err(|_| AdmissionError::InvalidUrl(request.image_url.clone()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AdmissionError::InvalidUrl(request.image_url.clone()));
    }
    if request.volume_name.trim().is_empty() {
        return Err(AdmissionError::EmptyVolumeName);
    }
    if !is_valid_volume_name(&request.volume_name) {
        return Err(AdmissionError::InvalidVolumeName(request.volume_name.clone()));
    }
    if request.volume_size_gib <= 0 {
        return Err(AdmissionError::InvalidSize(request.volume_size_gib));
    }
    Ok(())
}

fn is_valid_volume_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
