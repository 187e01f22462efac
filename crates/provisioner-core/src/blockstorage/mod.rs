//! Block-storage driver contract (C5).
//!
//! Grounded on the teacher's `storage` module discipline (preallocate,
//! write, explicit `sync()` before `finalize()`) generalized from regular
//! files to block devices, and `spec.md` §9's shell-out imperative: argument
//! arrays, captured output, allow-listed names.

pub mod lvm;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::BlockStorageError;
use crate::job::ImageFormat;
use crate::objectstore::ProgressTick;

pub use lvm::LvmBlockStorageDriver;

/// Attributes of an existing volume (`spec.md` §4.5 `info`).
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub name: String,
    pub size_bytes: u64,
    pub attributes: String,
}

/// Capability set required of the block-storage collaborator.
/// `create`/`delete` are not retried by the driver (the orchestrator handles
/// idempotency); `populate` is retried with the block-storage policy.
#[async_trait]
pub trait BlockStorageDriver: Send + Sync {
    /// Atomically create a new volume. Fails if `name` already exists.
    async fn create(&self, name: &str, size_gib: i64) -> Result<(), BlockStorageError>;

    /// Write `image_path`'s contents into the block device backing `name`,
    /// converting compressed images to raw on the device; raw images are
    /// copied directly with an explicit flush at the end.
    async fn populate(
        &self,
        image_path: &std::path::Path,
        name: &str,
        format: ImageFormat,
        cancel: &CancelToken,
        progress: ProgressTick<'_>,
    ) -> Result<(), BlockStorageError>;

    /// Best-effort removal; ok if the volume does not exist.
    async fn delete(&self, name: &str) -> Result<(), BlockStorageError>;

    async fn exists(&self, name: &str) -> Result<bool, BlockStorageError>;

    async fn info(&self, name: &str) -> Result<VolumeInfo, BlockStorageError>;

    async fn list(&self) -> Result<Vec<String>, BlockStorageError>;
}
