//! Error taxonomy shared across the provisioning pipeline.
//!
//! Each component gets a closed, matchable `thiserror` error type; the job
//! manager funnels all of them into a single `error_message` string
//! attached to the job record rather than propagating a pipeline-wide enum.

use thiserror::Error;

/// Error returned by the image cache (C3).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache path escapes cache root: {0}")]
    PathEscapesRoot(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sidecar content is not a valid 64-character hex checksum")]
    InvalidChecksumFormat,
}

/// Error returned by the object-store client (C4).
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object-store authentication failed")]
    Unauthorized,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("size mismatch after transfer: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("operation cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObjectStoreError {
    /// True if this error is worth retrying under the network retry policy.
    /// Not-found and auth failures are non-transient per spec.md §7.
    pub fn is_transient(&self) -> bool {
        match self {
            ObjectStoreError::NotFound(_) | ObjectStoreError::Unauthorized => false,
            ObjectStoreError::Cancelled => false,
            ObjectStoreError::Network(_) | ObjectStoreError::SizeMismatch { .. } | ObjectStoreError::Io(_) => true,
        }
    }
}

/// Error returned by the block-storage driver (C5).
#[derive(Debug, Error)]
pub enum BlockStorageError {
    #[error("invalid volume or group name: {0}")]
    InvalidName(String),
    #[error("volume already exists: {0}")]
    AlreadyExists(String),
    #[error("volume not found: {0}")]
    NotFound(String),
    #[error("external tool {tool} exited with status {status}: {output}")]
    ToolFailed {
        tool: String,
        status: i32,
        output: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by the durable job store (C2).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unknown on-disk status: {0}")]
    UnknownStatus(String),
}

/// Validation error raised at admission (`spec.md` §4.7, Admission).
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("image_url must not be empty")]
    EmptyUrl,
    #[error("image_url is not a valid absolute URL: {0}")]
    InvalidUrl(String),
    #[error("volume_name must not be empty")]
    EmptyVolumeName,
    #[error("volume_name is not a valid host identifier: {0}")]
    InvalidVolumeName(String),
    #[error("volume_size_gb must be a positive integer, got {0}")]
    InvalidSize(i64),
    #[error("image_type must be one of \"compressed\" or \"raw\", got {0:?}")]
    InvalidImageType(String),
}

/// Errors surfaced by the job manager's public entry points (`submit`,
/// `cancel`, `get_status`), as opposed to the pipeline errors that only ever
/// become an `error_message` on a job record.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {0} is not in a cancellable state")]
    NotCancellable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
