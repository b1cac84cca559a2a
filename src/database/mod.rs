/*!
 * Database module for persistent storage of task results.
 *
 * This module provides SQLite-based persistence for:
 * - A bounded connection pool with liveness checks
 * - The versioned `task_results` schema
 * - The task repository with transient-failure retries
 */

pub mod schema;
pub mod pool;
pub mod repository;
pub mod models;

// Re-export main types
pub use models::{TaskRecord, UpsertOutcome};
pub use pool::{ConnectionManager, ConnectionPool, PoolStatus, SqliteConnectionManager, SqlitePool};
pub use repository::{DbRetryPolicy, TaskRepository};
