/*!
 * # subtrans - resilient subtitle translation job runner
 *
 * Turns upstream task notifications into translated subtitle documents:
 * download the source-language document, translate it through a streaming
 * LLM API, publish the result to object storage and record its URL.
 *
 * ## Features
 *
 * - Idempotent recording of at-least-once task events
 * - Bounded worker pool with task-level delayed retries
 * - Per-call retries with exponential backoff and jitter
 * - Failure classification (permanent, retryable, unknown)
 * - Bounded SQLite connection pool with liveness checks
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `subtitle_processor`: Subtitle parsing, rendering and line tagging
 * - `classifier`: Failure classification table
 * - `providers`: Remote operations:
 *   - `providers::document`: HTTP download of source documents
 *   - `providers::gemini`: Streaming translation API client
 *   - `providers::storage`: Object storage publisher
 *   - `providers::mock`: Test doubles
 * - `database`: Connection pool, schema and task repository
 * - `jobs`: Task pipeline and job dispatcher
 * - `ingest`: Inbound task events
 * - `file_utils`: File system operations
 * - `app_controller`: Application-lifetime context
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod file_utils;
pub mod subtitle_processor;
pub mod classifier;
pub mod providers;
pub mod database;
pub mod jobs;
pub mod ingest;
pub mod app_controller;
pub mod errors;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::{Controller, IngestOutcome, IngestSummary};
pub use classifier::{classify, FailureClass};
pub use database::{TaskRecord, TaskRepository};
pub use ingest::TaskEvent;
pub use jobs::{Dispatcher, Job, JobOutcome, TaskPipeline, TaskRetryPolicy};
pub use subtitle_processor::{SubtitleDocument, SubtitleEntry};
pub use errors::{AppError, DatabaseError, PipelineError, PoolError, ProviderError, SubtitleError};
