//! Environment-sourced configuration (C9, `spec.md` §6).
//!
//! Grounded on `provisioner-core::config`'s typed-config shape, but sourced
//! from environment variables rather than TOML: the daemon is deployed as a
//! systemd unit / container (12-factor), not an interactive CLI tool, which
//! is also why this lives in the daemon crate rather than the core crate.
//! Invalid configuration is a hard error raised before the listener binds.

use std::path::PathBuf;
use std::time::Duration;

use provisioner_core::config::CoreConfig;
use provisioner_core::retry::RetryPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { var, reason: reason.into() }
}

/// Object-store access configuration (`MINIO_*` env vars).
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Auth and TLS material, all optional (`spec.md` §6). `tls_cert`/`tls_key`
/// are this specification's addition: `spec.md` names `CLIENT_CA_CERT` as
/// the client-verification material but a server needs its own cert/key to
/// terminate TLS at all, so the daemon also reads `TLS_CERT_PATH`/
/// `TLS_KEY_PATH` when mTLS is requested.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub client_ca_cert: Option<PathBuf>,
    pub api_tokens_file: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

/// Full daemon configuration, assembled from the environment at startup.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    pub core: CoreConfig,
    pub object_store: ObjectStoreConfig,
    pub auth: AuthConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_or("HOST", "0.0.0.0");
        let port = env_or("PORT", "8080")
            .parse::<u16>()
            .map_err(|e| invalid("PORT", e.to_string()))?;

        let database_path = PathBuf::from(env_or("DATABASE_PATH", "./provisioner.db"));

        let endpoint = require_env("MINIO_ENDPOINT")?;
        let parsed = url::Url::parse(&endpoint).map_err(|e| invalid("MINIO_ENDPOINT", e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(invalid("MINIO_ENDPOINT", "must be an http(s) URL"));
        }
        let access_key = first_present(&["MINIO_ACCESS_KEY", "MINIO_ACCESS_KEY_ID"])
            .ok_or_else(|| invalid("MINIO_ACCESS_KEY", "must be set"))?;
        let secret_key = first_present(&["MINIO_SECRET_KEY", "MINIO_SECRET_ACCESS_KEY"])
            .ok_or_else(|| invalid("MINIO_SECRET_KEY", "must be set"))?;

        let minio_retry_attempts = env_or("MINIO_RETRY_ATTEMPTS", "3")
            .parse::<u32>()
            .map_err(|e| invalid("MINIO_RETRY_ATTEMPTS", e.to_string()))?;
        let minio_retry_backoff = parse_delay_list("MINIO_RETRY_BACKOFF_MS", "100,1000,10000")?;
        let network_retry = build_retry_policy("MINIO_RETRY_ATTEMPTS", minio_retry_attempts, minio_retry_backoff)?;

        let volume_group = env_or("LVM_VOLUME_GROUP", "data");
        let lvm_retry_attempts = env_or("LVM_RETRY_ATTEMPTS", "2")
            .parse::<u32>()
            .map_err(|e| invalid("LVM_RETRY_ATTEMPTS", e.to_string()))?;
        let lvm_retry_backoff = parse_delay_list("LVM_RETRY_BACKOFF_MS", "100,1000")?;
        let block_storage_retry = build_retry_policy("LVM_RETRY_ATTEMPTS", lvm_retry_attempts, lvm_retry_backoff)?;

        let cache_root = PathBuf::from(env_or("CACHE_ROOT", "/var/lib/libvirt/data"));

        let mut core = CoreConfig::with_defaults(cache_root, database_path, volume_group);
        core.network_retry = network_retry;
        core.block_storage_retry = block_storage_retry;

        let auth = AuthConfig {
            client_ca_cert: std::env::var("CLIENT_CA_CERT").ok().map(PathBuf::from),
            api_tokens_file: std::env::var("API_TOKENS_FILE").ok().map(PathBuf::from),
            tls_cert: std::env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
            tls_key: std::env::var("TLS_KEY_PATH").ok().map(PathBuf::from),
        };

        Ok(DaemonConfig {
            host,
            port,
            core,
            object_store: ObjectStoreConfig { endpoint, access_key, secret_key },
            auth,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| invalid(key, "must be set"))
}

fn first_present(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| std::env::var(k).ok())
}

fn parse_delay_list(key: &'static str, default: &str) -> Result<Vec<Duration>, ConfigError> {
    let raw = env_or(key, default);
    raw.split(',')
        .map(|s| s.trim().parse::<u64>().map(Duration::from_millis).map_err(|e| invalid(key, e.to_string())))
        .collect()
}

fn build_retry_policy(attempts_var: &'static str, attempts: u32, delays: Vec<Duration>) -> Result<RetryPolicy, ConfigError> {
    if attempts < 1 {
        return Err(invalid(attempts_var, "must be at least 1"));
    }
    if delays.is_empty() {
        return Err(invalid(attempts_var, "delay list must not be empty"));
    }
    Ok(RetryPolicy::new(attempts, delays))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delay_list_splits_comma_list() {
        std::env::remove_var("TEST_DELAYS");
        let delays = parse_delay_list("TEST_DELAYS", "100,1000,10000").unwrap();
        assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_secs(1), Duration::from_secs(10)]);
    }

    #[test]
    fn build_retry_policy_rejects_zero_attempts() {
        let err = build_retry_policy("X", 0, vec![Duration::from_millis(1)]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
