/*!
 * End-to-end processing of a single job.
 *
 * A run walks `Fetching -> Translating -> Publishing -> Persisting -> Done`
 * and stops at the first failing stage. Local artifacts are removed on every
 * exit path, together with the per-run scratch directory. `TaskPipeline::run`
 * turns a failure into a task-level decision using the failure classifier.
 */

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::classifier::{classify, matching_phrase, FailureClass};
use crate::database::TaskRepository;
use crate::errors::{PipelineError, SubtitleError};
use crate::file_utils::FileManager;
use crate::providers::{DocumentSource, Publisher, Translator};
use crate::subtitle_processor::SubtitleDocument;

use super::{Job, JobOutcome, TaskRetryPolicy};

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Downloading the source document
    Fetching,
    /// Parsing, tagging and calling the translation API
    Translating,
    /// Rendering and uploading the translated document
    Publishing,
    /// Recording the published URL
    Persisting,
    /// Finished successfully
    Done,
    /// Stopped on an error
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetching => write!(f, "fetching"),
            Stage::Translating => write!(f, "translating"),
            Stage::Publishing => write!(f, "publishing"),
            Stage::Persisting => write!(f, "persisting"),
            Stage::Done => write!(f, "done"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

/// Runs jobs against the remote operations and the repository
#[derive(Debug, Clone)]
pub struct TaskPipeline {
    /// Source document download
    source: Arc<dyn DocumentSource>,
    /// Translation backend
    translator: Arc<dyn Translator>,
    /// Publish target
    publisher: Arc<dyn Publisher>,
    /// Task persistence
    repository: TaskRepository,
    /// Directory for local artifacts
    work_dir: PathBuf,
    /// Task-level retry rules
    retry_policy: TaskRetryPolicy,
}

impl TaskPipeline {
    /// Create a new pipeline
    pub fn new(
        source: Arc<dyn DocumentSource>,
        translator: Arc<dyn Translator>,
        publisher: Arc<dyn Publisher>,
        repository: TaskRepository,
        work_dir: impl Into<PathBuf>,
        retry_policy: TaskRetryPolicy,
    ) -> Self {
        Self {
            source,
            translator,
            publisher,
            repository,
            work_dir: work_dir.into(),
            retry_policy,
        }
    }

    /// Task-level retry rules in use
    pub fn retry_policy(&self) -> &TaskRetryPolicy {
        &self.retry_policy
    }

    /// Run every stage for `job` and return the published URL
    pub async fn execute(&self, job: &Job) -> Result<String, PipelineError> {
        // Per-run scratch directory: duplicate jobs for one task never share files
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| PipelineError::new(Stage::Fetching, e))?;
        let run_dir = tempfile::Builder::new()
            .prefix(&format!("{}.", FileManager::safe_file_stem(&job.task_id)))
            .tempdir_in(&self.work_dir)
            .map_err(|e| PipelineError::new(Stage::Fetching, e))?;

        let mut artifacts = Vec::new();
        let result = self.execute_stages(job, run_dir.path(), &mut artifacts).await;

        let removed = FileManager::remove_files(&artifacts).await;
        debug!("[{}] Cleaned up {} local artifacts", job.task_id, removed);
        if let Err(e) = run_dir.close() {
            warn!("[{}] Failed to remove scratch directory: {}", job.task_id, e);
        }

        result
    }

    async fn execute_stages(
        &self,
        job: &Job,
        run_dir: &Path,
        artifacts: &mut Vec<PathBuf>,
    ) -> Result<String, PipelineError> {
        let task_id = job.task_id.as_str();

        // Fetching
        info!("[{}] {} {}", task_id, Stage::Fetching, job.source_url);
        let source_file_name = job.source_file_name();
        artifacts.push(run_dir.join(&source_file_name));
        let source_path = self
            .source
            .fetch(&job.source_url, run_dir, &source_file_name)
            .await
            .map_err(|e| PipelineError::new(Stage::Fetching, e))?;

        // Translating
        info!("[{}] {}", task_id, Stage::Translating);
        let raw = tokio::fs::read(&source_path)
            .await
            .map_err(|e| PipelineError::new(Stage::Translating, e))?;
        let text = String::from_utf8_lossy(&raw);

        let document = SubtitleDocument::parse(&text).map_err(|e| PipelineError::new(Stage::Translating, e))?;
        if document.is_empty() {
            return Err(PipelineError::new(Stage::Translating, SubtitleError::ParseError(raw.len())));
        }
        info!("[{}] Parsed {} subtitle entries", task_id, document.len());

        let response = self
            .translator
            .translate(&document.tag())
            .await
            .map_err(|e| PipelineError::new(Stage::Translating, e))?;
        let translations = SubtitleDocument::untag(&response);

        let dropped = document.missing_translations(&translations);
        if dropped > 0 {
            warn!(
                "[{}] {} of {} entries have no translation and will be dropped",
                task_id,
                dropped,
                document.len()
            );
        }

        // Publishing
        info!("[{}] {}", task_id, Stage::Publishing);
        let rendered = document.render(&translations);
        let translated_file_name = job.translated_file_name();
        let translated_path = run_dir.join(&translated_file_name);
        artifacts.push(translated_path.clone());
        tokio::fs::write(&translated_path, rendered.as_bytes())
            .await
            .map_err(|e| PipelineError::new(Stage::Publishing, e))?;

        let translated_url = self
            .publisher
            .publish(task_id, &job.source_url, &translated_file_name, Bytes::from(rendered))
            .await
            .map_err(|e| PipelineError::new(Stage::Publishing, e))?;

        // Persisting
        info!("[{}] {}", task_id, Stage::Persisting);
        self.repository
            .update_translated_url(task_id, &translated_url)
            .await
            .map_err(|e| PipelineError::new(Stage::Persisting, e))?;

        info!("[{}] {}: {}", task_id, Stage::Done, translated_url);
        Ok(translated_url)
    }

    /// Execute `job` and decide what happens next
    pub async fn run(&self, job: Job) -> JobOutcome {
        match self.execute(&job).await {
            Ok(translated_url) => JobOutcome::Completed { translated_url },
            Err(e) => {
                let reason = e.to_string();
                let class = classify(&reason);
                debug!(
                    "[{}] Failure classified as {} (matched {:?})",
                    job.task_id,
                    class,
                    matching_phrase(&reason)
                );

                if self.retry_policy.should_retry(class, job.retry_count) {
                    let delay = self.retry_policy.delay_for(job.retry_count);
                    warn!(
                        "[{}] {} failure, retry {}/{} in {}s: {}",
                        job.task_id,
                        class,
                        job.retry_count + 1,
                        self.retry_policy.max_task_retries,
                        delay.as_secs(),
                        reason
                    );
                    JobOutcome::Retry {
                        job: job.next_attempt(),
                        delay,
                    }
                } else {
                    let why = match class {
                        FailureClass::Permanent => "permanent failure".to_string(),
                        _ => format!("{} failure after {} retries", class, job.retry_count),
                    };
                    error!("[{}] {} {}, giving up: {}", job.task_id, Stage::Failed, why, reason);
                    JobOutcome::Abandoned { class, reason }
                }
            }
        }
    }
}
