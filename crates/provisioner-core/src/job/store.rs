//! Durable job store (C2): `job_id -> record`, keyed, with status/updated_at
//! indices, a migration-tracked schema, and crash-recovery sweep.
//!
//! Grounded on `ResumeDb` from the teacher (sqlx + SQLite, single-writer
//! transactions, `recover_running_jobs`-style startup sweep), generalized
//! to store the full `JobRecord` and to track schema versions explicitly.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use super::types::{JobRecord, JobStatus, Progress, ProvisionRequest};
use crate::error::StoreError;

const HARD_LIST_LIMIT: i64 = 10_000;

/// Ordered schema migrations, applied in a transaction on `open`. Each
/// entry's index (1-based) is its schema version.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        job_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        request_json TEXT NOT NULL,
        progress_json TEXT,
        error_message TEXT,
        cache_hit INTEGER,
        image_path TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
    CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
    "#,
];

/// Optional filter for `list`.
#[derive(Debug, Clone, Copy)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
}

/// Handle to the SQLite-backed job store.
#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
}

impl JobStore {
    /// Open (or create) the database at `uri` (e.g. `sqlite://./provisioner.db`)
    /// and apply any unapplied migrations inside a transaction.
    pub async fn open(uri: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(uri)
            .await?;
        let store = JobStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory database (tests only).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied: Vec<i64> = sqlx::query("SELECT version FROM schema_migrations")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| r.get::<i64, _>("version"))
            .collect();

        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if applied.contains(&version) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in migration.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
                .bind(version)
                .bind(super::types::unix_now())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Insert-or-update, atomic. Idempotent: replaying the same state is a
    /// no-op observationally (`spec.md` §8).
    pub async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let request_json = serde_json::to_string(&record.request)?;
        let progress_json = record
            .progress
            .map(|p| serde_json::to_string(&p))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, status, request_json, progress_json, error_message,
                cache_hit, image_path, created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                request_json = excluded.request_json,
                progress_json = excluded.progress_json,
                error_message = excluded.error_message,
                cache_hit = excluded.cache_hit,
                image_path = excluded.image_path,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&record.job_id)
        .bind(record.status.as_str())
        .bind(request_json)
        .bind(progress_json)
        .bind(&record.error_message)
        .bind(record.cache_hit.map(|b| b as i64))
        .bind(&record.image_path)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        row_to_record(row)
    }

    pub async fn list(&self, filter: ListFilter, limit: i64, offset: i64) -> Result<Vec<JobRecord>, StoreError> {
        let capped_limit = limit.clamp(0, HARD_LIST_LIMIT);
        let rows = if let Some(status) = filter.status {
            sqlx::query("SELECT * FROM jobs WHERE status = ?1 ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3")
                .bind(status.as_str())
                .bind(capped_limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM jobs ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2")
                .bind(capped_limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter().map(row_to_record).collect()
    }

    /// Flip every `pending`/`running` record to `failed` with the recovery
    /// message. Run exactly once at startup, before admitting new requests.
    /// Idempotent: a second call finds nothing left to flip.
    pub async fn fail_in_progress(&self) -> Result<u64, StoreError> {
        let now = super::types::unix_now();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = 'daemon restarted while job in progress',
                updated_at = ?1,
                completed_at = ?1
            WHERE status IN ('pending', 'running')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove terminal records whose `updated_at` predates `now - age`.
    /// Non-terminal records are never touched.
    pub async fn delete_older_than(&self, age: std::time::Duration) -> Result<u64, StoreError> {
        let cutoff = super::types::unix_now() - age.as_secs() as i64;
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND updated_at < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self, status: JobStatus) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM jobs WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<JobRecord, StoreError> {
    let job_id: String = row.get("job_id");
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str).ok_or_else(|| StoreError::UnknownStatus(status_str.clone()))?;
    let request_json: String = row.get("request_json");
    let request: ProvisionRequest = serde_json::from_str(&request_json)?;
    let progress_json: Option<String> = row.get("progress_json");
    let progress: Option<Progress> = progress_json.as_deref().map(serde_json::from_str).transpose()?;
    let error_message: Option<String> = row.get("error_message");
    let cache_hit: Option<i64> = row.get("cache_hit");
    let image_path: Option<String> = row.get("image_path");
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    let completed_at: Option<i64> = row.get("completed_at");

    Ok(JobRecord {
        job_id,
        request,
        status,
        progress,
        error_message,
        cache_hit: cache_hit.map(|v| v != 0),
        image_path,
        created_at,
        updated_at,
        completed_at,
    })
}
