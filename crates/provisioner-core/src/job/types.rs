//! The data model from `spec.md` §3: Request, Job, status, progress.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Image format tag (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Compressed,
    Raw,
}

impl ImageFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compressed" => Some(ImageFormat::Compressed),
            "raw" => Some(ImageFormat::Raw),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Compressed => "compressed",
            ImageFormat::Raw => "raw",
        }
    }
}

/// Immutable input to a provisioning job (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub image_url: String,
    pub volume_name: String,
    pub volume_size_gib: i64,
    pub image_format: ImageFormat,
    pub correlation_id: Option<String>,
}

/// Closed status enum (`spec.md` §9: "Dynamic-typing artifacts" — re-expressed
/// as an enum with exhaustive variants; an unrecognized on-disk value is a
/// hard error, never silently tolerated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Ordered stage labels a job's progress moves through (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    CheckingCache,
    Downloading,
    CreatingVolume,
    Converting,
    Finalizing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::CheckingCache => "checking_cache",
            Stage::Downloading => "downloading",
            Stage::CreatingVolume => "creating_volume",
            Stage::Converting => "converting",
            Stage::Finalizing => "finalizing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(Stage::Initializing),
            "checking_cache" => Some(Stage::CheckingCache),
            "downloading" => Some(Stage::Downloading),
            "creating_volume" => Some(Stage::CreatingVolume),
            "converting" => Some(Stage::Converting),
            "finalizing" => Some(Stage::Finalizing),
            _ => None,
        }
    }
}

/// Progress tuple attached to a running job (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: Stage,
    pub percent: u8,
    pub bytes_processed: u64,
    pub bytes_total: u64,
}

/// One execution of the provisioning pipeline for one request (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub request: ProvisionRequest,
    pub status: JobStatus,
    pub progress: Option<Progress>,
    pub error_message: Option<String>,
    pub cache_hit: Option<bool>,
    pub image_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl JobRecord {
    pub fn new_pending(job_id: String, request: ProvisionRequest) -> Self {
        let now = unix_now();
        Self {
            job_id,
            request,
            status: JobStatus::Pending,
            progress: None,
            error_message: None,
            cache_hit: None,
            image_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Enforces the invariant: terminal status never changes afterwards,
    /// and `completed_at` is set exactly when status becomes terminal.
    pub fn transition(&mut self, status: JobStatus) {
        debug_assert!(!self.status.is_terminal(), "attempted to transition a terminal job");
        self.status = status;
        self.updated_at = unix_now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn set_progress(&mut self, progress: Progress) {
        self.progress = Some(progress);
        self.updated_at = unix_now();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.transition(JobStatus::Failed);
    }

    pub fn complete(&mut self, cache_hit: bool, image_path: String) {
        self.cache_hit = Some(cache_hit);
        self.image_path = Some(image_path);
        self.transition(JobStatus::Completed);
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
