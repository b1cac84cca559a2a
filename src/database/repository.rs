/*!
 * Repository layer for task persistence.
 *
 * Every operation runs on the blocking thread pool, borrows a pooled
 * connection for exactly one attempt and hands it back before any backoff
 * sleep. Transient failures (busy database, pool exhaustion, dead
 * connections) are retried with a linear backoff; everything else is
 * returned to the caller unchanged.
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::app_config::DatabaseConfig;
use crate::errors::DatabaseError;

use super::models::{TaskRecord, UpsertOutcome};
use super::pool::{SqliteConnectionManager, SqlitePool};
use super::schema;

/// Retry settings for database operations
#[derive(Debug, Clone)]
pub struct DbRetryPolicy {
    /// Total attempts per operation
    pub max_attempts: u32,
    /// Attempt `n` failing waits `backoff_step * n` before the next one
    pub backoff_step: Duration,
    /// How long one attempt may wait for a pooled connection
    pub acquire_timeout: Duration,
}

impl Default for DbRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(2),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&DatabaseConfig> for DbRetryPolicy {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_step: Duration::from_secs_f64(config.retry_backoff_secs),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
        }
    }
}

/// Persistence manager for task records
#[derive(Debug, Clone)]
pub struct TaskRepository {
    /// Connection pool
    pool: SqlitePool,
    /// Retry settings
    policy: DbRetryPolicy,
}

impl TaskRepository {
    /// Create a repository over an existing pool
    pub fn new(pool: SqlitePool, policy: DbRetryPolicy) -> Self {
        Self { pool, policy }
    }

    /// Open the database at `path`, build a pool of `capacity` and initialize the schema
    pub fn open(path: &Path, capacity: usize, policy: DbRetryPolicy) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::Operational(format!("Failed to create database directory {:?}: {}", parent, e)))?;
            }
        }

        info!("Opening database at: {:?}", path);
        let pool = SqlitePool::new(SqliteConnectionManager::new(path), capacity);

        let conn = pool.acquire(policy.acquire_timeout)?;
        schema::initialize_schema(&conn)
            .map_err(|e| DatabaseError::Query(format!("{:#}", e)))?;
        drop(conn);

        Ok(Self::new(pool, policy))
    }

    /// Open using the `database` configuration section
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Self::open(&config.path, config.max_connections, DbRetryPolicy::from(config))
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `op` with up to `max_attempts` attempts on transient failures.
    ///
    /// A connection is acquired before and released after every attempt.
    pub async fn execute_with_retry<T, F>(&self, name: &'static str, op: F) -> Result<T, DatabaseError>
    where
        F: Fn(&mut Connection) -> Result<T, DatabaseError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let pool = self.pool.clone();
            let op = op.clone();
            let acquire_timeout = self.policy.acquire_timeout;

            let result = tokio::task::spawn_blocking(move || {
                let mut conn = pool.acquire(acquire_timeout)?;
                (*op)(&mut conn)
            })
            .await
            .unwrap_or_else(|e| Err(DatabaseError::Worker(e.to_string())));

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.policy.backoff_step * attempt;
                    warn!(
                        "Database operation {} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        name,
                        attempt,
                        attempts,
                        delay.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!("Database operation {} gave up after {} attempts: {}", name, attempts, e);
                    }
                    return Err(e);
                }
            }
        }

        Err(DatabaseError::Worker(format!("{} made no attempt", name)))
    }

    /// Insert a task record or merge it into the stored one.
    ///
    /// New values win, except that an empty subtitle URL never replaces a
    /// recorded one and `create_time` is kept from the first insert. Rows are
    /// only rewritten when something actually changes, so repeating an
    /// upsert leaves the table (including `updated_at`) untouched.
    pub async fn upsert_task(&self, record: &TaskRecord) -> Result<UpsertOutcome, DatabaseError> {
        let record = record.clone();

        self.execute_with_retry("upsert_task", move |conn| {
            let existed = Self::exists_sync(conn, &record.task_id)?;
            let now = chrono::Utc::now().to_rfc3339();

            let changed = conn.execute(
                r#"
                INSERT INTO task_results (
                    task_id, status, create_time, video_name, source_url, output_path,
                    source_subtitle_url, translated_subtitle_url, owner, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(task_id) DO UPDATE SET
                    status = excluded.status,
                    video_name = excluded.video_name,
                    source_url = excluded.source_url,
                    output_path = excluded.output_path,
                    source_subtitle_url = COALESCE(NULLIF(excluded.source_subtitle_url, ''), task_results.source_subtitle_url),
                    translated_subtitle_url = COALESCE(NULLIF(excluded.translated_subtitle_url, ''), task_results.translated_subtitle_url),
                    owner = excluded.owner,
                    updated_at = excluded.updated_at
                WHERE task_results.status != excluded.status
                   OR task_results.video_name != excluded.video_name
                   OR task_results.source_url != excluded.source_url
                   OR task_results.output_path != excluded.output_path
                   OR task_results.owner != excluded.owner
                   OR (excluded.source_subtitle_url != '' AND task_results.source_subtitle_url != excluded.source_subtitle_url)
                   OR (excluded.translated_subtitle_url != '' AND task_results.translated_subtitle_url != excluded.translated_subtitle_url)
                "#,
                params![
                    record.task_id,
                    record.status,
                    record.create_time,
                    record.video_name,
                    record.source_url,
                    record.output_path,
                    record.source_subtitle_url,
                    record.translated_subtitle_url,
                    record.owner,
                    now,
                ],
            )?;

            let outcome = match (existed, changed) {
                (false, _) => UpsertOutcome::Inserted,
                (true, 0) => UpsertOutcome::Unchanged,
                (true, _) => UpsertOutcome::Updated,
            };
            debug!("Task {} upsert: {}", record.task_id, outcome);
            Ok(outcome)
        })
        .await
    }

    /// Whether a record exists for `task_id`
    pub async fn task_exists(&self, task_id: &str) -> Result<bool, DatabaseError> {
        let task_id = task_id.to_string();
        self.execute_with_retry("task_exists", move |conn| Self::exists_sync(conn, &task_id))
            .await
    }

    fn exists_sync(conn: &Connection, task_id: &str) -> Result<bool, DatabaseError> {
        let found = conn
            .query_row(
                "SELECT 1 FROM task_results WHERE task_id = ?1",
                [task_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Load a task record
    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, DatabaseError> {
        let task_id = task_id.to_string();
        self.execute_with_retry("get_task", move |conn| {
            let sql = format!("SELECT {} FROM task_results WHERE task_id = ?1", TaskRecord::COLUMNS);
            let record = conn
                .query_row(&sql, [&task_id], TaskRecord::from_row)
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// Record the published URL of a task. A missing row is an error.
    pub async fn update_translated_url(&self, task_id: &str, url: &str) -> Result<(), DatabaseError> {
        let task_id = task_id.to_string();
        let url = url.to_string();

        self.execute_with_retry("update_translated_url", move |conn| {
            let updated = conn.execute(
                "UPDATE task_results SET translated_subtitle_url = ?2, updated_at = ?3 WHERE task_id = ?1",
                params![task_id, url, chrono::Utc::now().to_rfc3339()],
            )?;

            if updated == 0 {
                return Err(DatabaseError::TaskNotFound(task_id.clone()));
            }
            Ok(())
        })
        .await
    }
}
