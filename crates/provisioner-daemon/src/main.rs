//! Daemon bootstrap (C8): load config, recover durable state, bind the
//! listener. Mirrors the teacher's `ddm-cli`'s thin-wrapper-over-the-core
//! shape, except the front door is HTTP instead of a CLI.

mod config_env;
mod http;
mod logging;
mod metrics;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use provisioner_core::blockstorage::LvmBlockStorageDriver;
use provisioner_core::cache::ImageCache;
use provisioner_core::job::{JobManager, JobManagerDeps, JobStatus, JobStore};
use provisioner_core::objectstore::HttpObjectStoreClient;

use crate::config_env::DaemonConfig;
use crate::http::auth::AuthState;
use crate::http::AppState;
use crate::metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = DaemonConfig::from_env()?;
    tracing::info!(host = %config.host, port = config.port, "starting provisioner daemon");

    let cache = Arc::new(ImageCache::open(config.core.cache_root.clone())?);
    let database_uri = format!("sqlite://{}?mode=rwc", config.core.database_path.display());
    let store = JobStore::open(&database_uri).await?;

    let object_store = Arc::new(HttpObjectStoreClient::new(
        config.object_store.endpoint.clone(),
        config.object_store.access_key.clone(),
        config.object_store.secret_key.clone(),
        config.core.network_retry.clone(),
    ));
    let block_storage = Arc::new(LvmBlockStorageDriver::new(
        config.core.volume_group.clone(),
        config.core.block_storage_retry.clone(),
    )?);

    let metrics = Arc::new(Metrics::new());
    let metrics_for_observer = Arc::clone(&metrics);
    let job_observer = Arc::new(move |status: JobStatus| {
        let label = match status {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Pending | JobStatus::Running => return,
        };
        metrics_for_observer.jobs_total.with_label_values(&[label]).inc();
    });

    let manager = JobManager::new(JobManagerDeps {
        object_store,
        block_storage,
        cache,
        store,
        config: config.core.clone(),
        job_observer: Some(job_observer),
    });

    let recovered = manager.recover().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "flipped in-progress jobs to failed after restart");
    }

    let app_state = AppState { manager, metrics };

    let auth_state = match &config.auth.api_tokens_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "bearer-token auth enabled");
            AuthState::from_file(path)?
        }
        None => {
            tracing::warn!("API_TOKENS_FILE not set; serving without bearer-token auth");
            AuthState::disabled()
        }
    };

    let router = http::build_router(app_state, auth_state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    match tls::build_rustls_config(&config.auth).await? {
        Some(rustls_config) => {
            tracing::info!(%addr, "serving HTTPS");
            axum_server::bind_rustls(addr, rustls_config).serve(router.into_make_service()).await?;
        }
        None => {
            tracing::warn!(%addr, "TLS_CERT_PATH/TLS_KEY_PATH not set; serving plain HTTP");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router).await?;
        }
    }

    Ok(())
}
