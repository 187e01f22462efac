//! Object-store client contract (C4).
//!
//! The teacher has no async HTTP client (it probes headers synchronously via
//! `curl` in `fetch_head`); this trait is the "enrich from the rest of the
//! pack" seam described in `SPEC_FULL.md` §4.4, implemented concretely by
//! [`http_client::HttpObjectStoreClient`] using `reqwest`. The trait itself
//! follows the teacher's discipline of passing collaborators by reference
//! into the pipeline (`StorageWriter`, `HostPolicy`) rather than the job
//! manager depending on a concrete type.

pub mod http_client;

use std::path::Path;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::ObjectStoreError;

pub use http_client::HttpObjectStoreClient;

/// A progress tick callback: `(bytes_processed, bytes_total)`.
pub type ProgressTick<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Capability set required of the object-store collaborator (`spec.md` §4.4).
/// All three operations are cancellable and internally retried with the
/// network retry policy; callers observe retries as one opaque attempt.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Size of the object in bytes, or a not-found / network error.
    async fn stat(&self, url: &str, cancel: &CancelToken) -> Result<u64, ObjectStoreError>;

    /// Bounded read of a small object (sidecar checksums). Rejects bodies
    /// larger than the implementation's small-object ceiling.
    async fn get_small(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, ObjectStoreError>;

    /// Stream the object to `dest`, ticking `progress` after each chunk.
    /// On successful return every byte has been written and checked against
    /// `stat`. On cancellation or error, no partially-written file beyond
    /// the last acknowledged chunk is left in an inconsistent state; the
    /// caller is responsible for deleting `dest` on failure (`spec.md` §4.7
    /// step 5).
    async fn stream_to(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancelToken,
        progress: ProgressTick<'_>,
    ) -> Result<(), ObjectStoreError>;
}
