/*!
 * Translation jobs and task-level retry policy.
 *
 * - `pipeline`: one end-to-end run of a job (fetch, translate, publish, persist)
 * - `dispatcher`: bounded worker pool with delayed re-submission
 *
 * A job is created when an event reports a finished task with a subtitle
 * URL. It is only ever mutated by bumping `retry_count` on re-submission.
 */

use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::app_config::JobsConfig;
use crate::classifier::FailureClass;
use crate::file_utils::FileManager;

pub mod pipeline;
pub mod dispatcher;

pub use dispatcher::{Dispatcher, DispatcherStats, JobRunner};
pub use pipeline::{Stage, TaskPipeline};

/// One unit of translation work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Task identifier, also the job identifier
    pub task_id: String,
    /// Source subtitle document URL
    pub source_url: String,
    /// Owner of the task
    pub owner: String,
    /// Number of task-level re-submissions so far
    #[serde(default)]
    pub retry_count: u32,
}

impl Job {
    /// Create a fresh job
    pub fn new(task_id: impl Into<String>, source_url: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            source_url: source_url.into(),
            owner: owner.into(),
            retry_count: 0,
        }
    }

    /// Copy of this job for the next task-level attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Local name of the downloaded source document
    pub fn source_file_name(&self) -> String {
        format!("{}_source.srt", FileManager::safe_file_stem(&self.task_id))
    }

    /// Local name of the rendered translation
    pub fn translated_file_name(&self) -> String {
        format!("{}_translated.srt", FileManager::safe_file_stem(&self.task_id))
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} (retry {})", self.task_id, self.retry_count)
    }
}

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Published and recorded
    Completed {
        /// URL of the published translation
        translated_url: String,
    },
    /// Terminal failure, logged only
    Abandoned {
        /// Classification of the last failure
        class: FailureClass,
        /// Failure description
        reason: String,
    },
    /// Re-submit `job` after `delay`
    Retry {
        /// Job with `retry_count` already bumped
        job: Job,
        /// Wait before re-submission
        delay: Duration,
    },
}

/// Task-level retry rules
#[derive(Debug, Clone)]
pub struct TaskRetryPolicy {
    /// Jobs with this many re-submissions are not retried again
    pub max_task_retries: u32,
    /// Unknown failures are retried only below this retry count
    pub unknown_retry_limit: u32,
    /// Base of the `2^(n+1) * base` delay
    pub retry_base: Duration,
    /// Delay cap
    pub retry_cap: Duration,
}

impl Default for TaskRetryPolicy {
    fn default() -> Self {
        Self {
            max_task_retries: 3,
            unknown_retry_limit: 2,
            retry_base: Duration::from_secs(60),
            retry_cap: Duration::from_secs(1800),
        }
    }
}

impl From<&JobsConfig> for TaskRetryPolicy {
    fn from(config: &JobsConfig) -> Self {
        Self {
            max_task_retries: config.max_task_retries,
            unknown_retry_limit: config.max_task_retries.min(2),
            retry_base: Duration::from_secs_f64(config.retry_base_secs),
            retry_cap: Duration::from_secs_f64(config.retry_cap_secs),
        }
    }
}

impl TaskRetryPolicy {
    /// Delay before re-submitting a job that has been retried `retry_count` times
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.saturating_add(1));
        self.retry_base.saturating_mul(factor).min(self.retry_cap)
    }

    /// Whether a failure of `class` on a job with `retry_count` deserves another run
    pub fn should_retry(&self, class: FailureClass, retry_count: u32) -> bool {
        if retry_count >= self.max_task_retries {
            return false;
        }
        match class {
            FailureClass::Permanent => false,
            FailureClass::Retryable => true,
            FailureClass::Unknown => retry_count < self.unknown_retry_limit,
        }
    }
}
