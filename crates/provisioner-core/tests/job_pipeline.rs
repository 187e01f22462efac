//! End-to-end exercise of the job manager pipeline (`spec.md` §8) against
//! fake `ObjectStoreClient`/`BlockStorageDriver` collaborators, mirroring
//! the teacher's `tests/integration_range_download.rs` shape: a real
//! `JobStore`/`ImageCache` on a tempdir, fake network/storage edges.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use provisioner_core::blockstorage::{BlockStorageDriver, VolumeInfo};
use provisioner_core::cache::ImageCache;
use provisioner_core::cancel::CancelToken;
use provisioner_core::config::CoreConfig;
use provisioner_core::error::{BlockStorageError, ObjectStoreError};
use provisioner_core::job::{ImageFormat, JobManager, JobManagerDeps, JobRecord, JobStatus, JobStore, ProvisionRequest};
use provisioner_core::objectstore::{ObjectStoreClient, ProgressTick};

const VALID_CHECKSUM: &str = "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2";

/// A fixed-body object served at `image_url`, with a sidecar at
/// `<image_url>.sha256`. `stream_delay` simulates an in-flight download so
/// tests can cancel or race the deadline mid-transfer.
struct FakeObjectStoreClient {
    body: Vec<u8>,
    stream_delay: Duration,
    stream_calls: AtomicUsize,
}

impl FakeObjectStoreClient {
    fn new(body: Vec<u8>) -> Self {
        Self { body, stream_delay: Duration::ZERO, stream_calls: AtomicUsize::new(0) }
    }

    fn with_delay(body: Vec<u8>, delay: Duration) -> Self {
        Self { body, stream_delay: delay, stream_calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ObjectStoreClient for FakeObjectStoreClient {
    async fn stat(&self, _url: &str, _cancel: &CancelToken) -> Result<u64, ObjectStoreError> {
        Ok(self.body.len() as u64)
    }

    async fn get_small(&self, url: &str, _cancel: &CancelToken) -> Result<Vec<u8>, ObjectStoreError> {
        if url.ends_with(".sha256") {
            Ok(VALID_CHECKSUM.as_bytes().to_vec())
        } else {
            Err(ObjectStoreError::NotFound(url.to_string()))
        }
    }

    async fn stream_to(
        &self,
        _url: &str,
        dest: &Path,
        cancel: &CancelToken,
        progress: ProgressTick<'_>,
    ) -> Result<(), ObjectStoreError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if !self.stream_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.stream_delay) => {}
                _ = cancel.cancelled() => return Err(ObjectStoreError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(ObjectStoreError::Cancelled);
        }
        tokio::fs::write(dest, &self.body).await?;
        progress(self.body.len() as u64, self.body.len() as u64);
        Ok(())
    }
}

/// In-memory volume set with switches to force `populate`/`create` failures.
struct FakeBlockStorageDriver {
    volumes: Mutex<HashSet<String>>,
    populate_should_fail: bool,
    populate_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent_seen: AtomicUsize,
    hold: Duration,
}

impl FakeBlockStorageDriver {
    fn new() -> Self {
        Self {
            volumes: Mutex::new(HashSet::new()),
            populate_should_fail: false,
            populate_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent_seen: AtomicUsize::new(0),
            hold: Duration::ZERO,
        }
    }

    fn failing_populate() -> Self {
        Self { populate_should_fail: true, ..Self::new() }
    }

    fn tracking_concurrency(hold: Duration) -> Self {
        Self { hold, ..Self::new() }
    }
}

#[async_trait]
impl BlockStorageDriver for FakeBlockStorageDriver {
    async fn create(&self, name: &str, _size_gib: i64) -> Result<(), BlockStorageError> {
        let mut volumes = self.volumes.lock().unwrap();
        if !volumes.insert(name.to_string()) {
            return Err(BlockStorageError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn populate(
        &self,
        _image_path: &Path,
        _name: &str,
        _format: ImageFormat,
        _cancel: &CancelToken,
        _progress: ProgressTick<'_>,
    ) -> Result<(), BlockStorageError> {
        self.populate_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_seen.fetch_max(now, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        if self.populate_should_fail {
            return Err(BlockStorageError::ToolFailed {
                tool: "qemu-img".to_string(),
                status: 1,
                output: "simulated conversion failure".to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BlockStorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.volumes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, BlockStorageError> {
        Ok(self.volumes.lock().unwrap().contains(name))
    }

    async fn info(&self, name: &str) -> Result<VolumeInfo, BlockStorageError> {
        if self.volumes.lock().unwrap().contains(name) {
            Ok(VolumeInfo { name: name.to_string(), size_bytes: 0, attributes: String::new() })
        } else {
            Err(BlockStorageError::NotFound(name.to_string()))
        }
    }

    async fn list(&self) -> Result<Vec<String>, BlockStorageError> {
        Ok(self.volumes.lock().unwrap().iter().cloned().collect())
    }
}

fn sample_request(image_url: &str, volume_name: &str) -> ProvisionRequest {
    ProvisionRequest {
        image_url: image_url.to_string(),
        volume_name: volume_name.to_string(),
        volume_size_gib: 10,
        image_format: ImageFormat::Compressed,
        correlation_id: None,
    }
}

async fn wait_for_terminal(manager: &std::sync::Arc<JobManager>, job_id: &str) -> JobRecord {
    for _ in 0..200 {
        let record = manager.get_status(job_id).await.expect("job exists");
        if record.status.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal state in time");
}

#[tokio::test]
async fn cold_download_then_provision_completes() {
    let cache_dir = tempdir().unwrap();
    let store = JobStore::open_in_memory().await.unwrap();
    let cache = std::sync::Arc::new(ImageCache::open(cache_dir.path().to_path_buf()).unwrap());
    let config = CoreConfig::with_defaults(cache_dir.path().to_path_buf(), ":memory:".into(), "data".into());

    let object_store = std::sync::Arc::new(FakeObjectStoreClient::new(b"qcow2-bytes".to_vec()));
    let block_storage = std::sync::Arc::new(FakeBlockStorageDriver::new());

    let manager = JobManager::new(JobManagerDeps {
        object_store,
        block_storage: block_storage.clone(),
        cache,
        store,
        config,
        job_observer: None,
    });

    let admitted = manager.submit(sample_request("http://obj/images/one.qcow2", "vm-1")).await.unwrap();
    let record = wait_for_terminal(&manager, &admitted.job_id).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.cache_hit, Some(false));
    assert!(record.image_path.is_some());
    assert_eq!(block_storage.populate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_job_with_same_checksum_is_served_from_cache() {
    let cache_dir = tempdir().unwrap();
    let store = JobStore::open_in_memory().await.unwrap();
    let cache = std::sync::Arc::new(ImageCache::open(cache_dir.path().to_path_buf()).unwrap());
    let config = CoreConfig::with_defaults(cache_dir.path().to_path_buf(), ":memory:".into(), "data".into());

    let object_store = std::sync::Arc::new(FakeObjectStoreClient::new(b"same-bytes".to_vec()));
    let block_storage = std::sync::Arc::new(FakeBlockStorageDriver::new());

    let manager = JobManager::new(JobManagerDeps {
        object_store: object_store.clone(),
        block_storage,
        cache,
        store,
        config,
        job_observer: None,
    });

    let first = manager.submit(sample_request("http://obj/images/shared.qcow2", "vm-a")).await.unwrap();
    let first_record = wait_for_terminal(&manager, &first.job_id).await;
    assert_eq!(first_record.status, JobStatus::Completed);
    assert_eq!(first_record.cache_hit, Some(false));
    assert_eq!(object_store.stream_calls.load(Ordering::SeqCst), 1);

    let second = manager.submit(sample_request("http://obj/images/shared.qcow2", "vm-b")).await.unwrap();
    let second_record = wait_for_terminal(&manager, &second.job_id).await;
    assert_eq!(second_record.status, JobStatus::Completed);
    assert_eq!(second_record.cache_hit, Some(true));
    // The object is never re-downloaded on a cache hit.
    assert_eq!(object_store.stream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn populate_failure_rolls_back_the_created_volume() {
    let cache_dir = tempdir().unwrap();
    let store = JobStore::open_in_memory().await.unwrap();
    let cache = std::sync::Arc::new(ImageCache::open(cache_dir.path().to_path_buf()).unwrap());
    let config = CoreConfig::with_defaults(cache_dir.path().to_path_buf(), ":memory:".into(), "data".into());

    let object_store = std::sync::Arc::new(FakeObjectStoreClient::new(b"bytes".to_vec()));
    let block_storage = std::sync::Arc::new(FakeBlockStorageDriver::failing_populate());

    let manager = JobManager::new(JobManagerDeps {
        object_store,
        block_storage: block_storage.clone(),
        cache,
        store,
        config,
        job_observer: None,
    });

    let admitted = manager.submit(sample_request("http://obj/images/broken.qcow2", "vm-broken")).await.unwrap();
    let record = wait_for_terminal(&manager, &admitted.job_id).await;

    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error_message.unwrap().contains("populate step"));
    assert_eq!(block_storage.delete_calls.load(Ordering::SeqCst), 1);
    assert!(!block_storage.volumes.lock().unwrap().contains("vm-broken"));
}

#[tokio::test]
async fn cancelling_mid_download_fails_the_job_and_rolls_back_nothing_pending() {
    let cache_dir = tempdir().unwrap();
    let store = JobStore::open_in_memory().await.unwrap();
    let cache = std::sync::Arc::new(ImageCache::open(cache_dir.path().to_path_buf()).unwrap());
    let config = CoreConfig::with_defaults(cache_dir.path().to_path_buf(), ":memory:".into(), "data".into());

    let object_store = std::sync::Arc::new(FakeObjectStoreClient::with_delay(b"slow".to_vec(), Duration::from_secs(5)));
    let block_storage = std::sync::Arc::new(FakeBlockStorageDriver::new());

    let manager = JobManager::new(JobManagerDeps {
        object_store,
        block_storage,
        cache,
        store,
        config,
        job_observer: None,
    });

    let admitted = manager.submit(sample_request("http://obj/images/slow.qcow2", "vm-slow")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.cancel(&admitted.job_id).await.unwrap();

    let record = wait_for_terminal(&manager, &admitted.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("job cancelled by user"));
}

#[tokio::test]
async fn concurrency_ceiling_limits_simultaneous_populate_calls() {
    let cache_dir = tempdir().unwrap();
    let store = JobStore::open_in_memory().await.unwrap();
    let cache = std::sync::Arc::new(ImageCache::open(cache_dir.path().to_path_buf()).unwrap());
    // `CoreConfig::with_defaults` sets the ceiling to 2 (`spec.md` §4.7's P).
    let config = CoreConfig::with_defaults(cache_dir.path().to_path_buf(), ":memory:".into(), "data".into());
    assert_eq!(config.max_concurrent_jobs, 2);

    let object_store = std::sync::Arc::new(FakeObjectStoreClient::new(b"bytes".to_vec()));
    let block_storage = std::sync::Arc::new(FakeBlockStorageDriver::tracking_concurrency(Duration::from_millis(100)));

    let manager = JobManager::new(JobManagerDeps {
        object_store,
        block_storage: block_storage.clone(),
        cache,
        store,
        config,
        job_observer: None,
    });

    let mut admitted = Vec::new();
    for i in 0..3 {
        let request = sample_request(&format!("http://obj/images/job{i}.qcow2"), &format!("vm-conc-{i}"));
        admitted.push(manager.submit(request).await.unwrap());
    }
    for a in &admitted {
        wait_for_terminal(&manager, &a.job_id).await;
    }

    assert!(block_storage.max_concurrent_seen.load(Ordering::SeqCst) <= 2);
    assert_eq!(block_storage.populate_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn restart_recovery_fails_jobs_left_running() {
    let cache_dir = tempdir().unwrap();
    let store = JobStore::open_in_memory().await.unwrap();

    let mut stale = JobRecord::new_pending("orphan-job".to_string(), sample_request("http://obj/images/orphan.qcow2", "vm-orphan"));
    stale.status = JobStatus::Running;
    store.save(&stale).await.unwrap();

    let cache = std::sync::Arc::new(ImageCache::open(cache_dir.path().to_path_buf()).unwrap());
    let config = CoreConfig::with_defaults(cache_dir.path().to_path_buf(), ":memory:".into(), "data".into());
    let object_store = std::sync::Arc::new(FakeObjectStoreClient::new(b"bytes".to_vec()));
    let block_storage = std::sync::Arc::new(FakeBlockStorageDriver::new());

    let manager = JobManager::new(JobManagerDeps { object_store, block_storage, cache, store, config, job_observer: None });
    let recovered = manager.recover().await.unwrap();
    assert_eq!(recovered, 1);

    let record = manager.get_status("orphan-job").await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
}
