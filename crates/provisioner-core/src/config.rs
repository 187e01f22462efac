//! Core configuration: the tuning knobs the job manager and its
//! collaborators need, independent of how they were sourced (the daemon
//! binary parses environment variables per `spec.md` §6 into this struct;
//! tests construct it directly).

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for the provisioning engine (C1–C7).
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Global concurrency ceiling `P` (`spec.md` §4.7). Default 2.
    pub max_concurrent_jobs: usize,
    /// Per-job wall-clock budget `T` (`spec.md` §4.7). Default 30 minutes.
    pub job_deadline: Duration,
    /// Root directory of the content-addressed image cache (C3).
    pub cache_root: PathBuf,
    /// Path to the durable job-store database file (C2).
    pub database_path: PathBuf,
    /// Retry policy used by the object-store client (C4).
    pub network_retry: RetryPolicy,
    /// Retry policy used by the block-storage driver's `populate` (C5).
    pub block_storage_retry: RetryPolicy,
    /// Name of the block-storage group the driver owns (C5).
    pub volume_group: String,
}

impl CoreConfig {
    /// Defaults matching `spec.md` §4.7 and §6, for use where the caller
    /// only wants to override a couple of fields (mainly tests).
    pub fn with_defaults(cache_root: PathBuf, database_path: PathBuf, volume_group: String) -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_deadline: Duration::from_secs(30 * 60),
            cache_root,
            database_path,
            network_retry: RetryPolicy::network_defaults(),
            block_storage_retry: RetryPolicy::block_storage_defaults(),
            volume_group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = CoreConfig::with_defaults(
            PathBuf::from("/var/lib/libvirt/data"),
            PathBuf::from("./provisioner.db"),
            "data".to_string(),
        );
        assert_eq!(cfg.max_concurrent_jobs, 2);
        assert_eq!(cfg.job_deadline, Duration::from_secs(1800));
        assert_eq!(cfg.network_retry.max_attempts(), 3);
        assert_eq!(cfg.block_storage_retry.max_attempts(), 2);
    }
}
