use anyhow::{Result, Context};
use log::{error, warn, info, debug};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::app_config::Config;
use crate::database::{TaskRepository, UpsertOutcome};
use crate::file_utils::FileManager;
use crate::ingest::TaskEvent;
use crate::jobs::{Dispatcher, DispatcherStats, Job, TaskPipeline, TaskRetryPolicy};
use crate::providers::document::HttpDocumentFetcher;
use crate::providers::gemini::GeminiTranslator;
use crate::providers::storage::ObjectStorePublisher;
use crate::providers::{DocumentSource, Publisher, Translator};

// @module: Application-lifetime context wiring pool, repository, pipeline and dispatcher

/// What `Controller::ingest` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    // @field: Effect of the record upsert
    pub record: UpsertOutcome,
    // @field: Whether a translation job was queued
    pub job_submitted: bool,
}

/// Totals for one event stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Lines decoded as events
    pub events: usize,
    /// Jobs queued
    pub jobs_submitted: usize,
    /// Lines that were not valid events
    pub malformed: usize,
    /// Events whose record could not be stored
    pub failed: usize,
}

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Task persistence
    repository: TaskRepository,
    // @field: Worker pool running the pipeline
    dispatcher: Dispatcher,
}

impl Controller {
    // @method: Build every component from configuration. Needs a running tokio runtime.
    pub fn with_config(config: Config) -> Result<Self> {
        let repository = TaskRepository::from_config(&config.database)
            .with_context(|| format!("Failed to open task database at {:?}", config.database.path))?;

        let source: Arc<dyn DocumentSource> = Arc::new(HttpDocumentFetcher::from_config(&config.fetch));
        let translator: Arc<dyn Translator> = Arc::new(GeminiTranslator::from_config(&config.translation));
        let publisher: Arc<dyn Publisher> = Arc::new(ObjectStorePublisher::from_config(&config.storage));

        Self::with_components(config, source, translator, publisher, repository)
    }

    // @method: Build a controller around explicit components
    pub fn with_components(
        config: Config,
        source: Arc<dyn DocumentSource>,
        translator: Arc<dyn Translator>,
        publisher: Arc<dyn Publisher>,
        repository: TaskRepository,
    ) -> Result<Self> {
        FileManager::ensure_dir(&config.jobs.work_dir)
            .with_context(|| format!("Failed to create work directory {:?}", config.jobs.work_dir))?;

        let pipeline = Arc::new(TaskPipeline::new(
            source,
            translator,
            publisher,
            repository.clone(),
            config.jobs.work_dir.clone(),
            TaskRetryPolicy::from(&config.jobs),
        ));
        let dispatcher = Dispatcher::start(pipeline, config.jobs.workers);

        info!(
            "Controller ready: {} workers, {} database connections, work dir {:?}",
            config.jobs.workers, config.database.max_connections, config.jobs.work_dir
        );

        Ok(Self {
            config,
            repository,
            dispatcher,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Task persistence
    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    /// Record an event and queue a translation job when the event asks for one
    pub async fn ingest(&self, event: &TaskEvent) -> Result<IngestOutcome> {
        let record = event.to_record();
        if record.task_id.is_empty() {
            return Err(anyhow::anyhow!("Event without task_id"));
        }

        if self.repository.task_exists(&record.task_id).await? {
            debug!("[{}] Event for known task (status {})", record.task_id, record.status);
        }

        let outcome = self
            .repository
            .upsert_task(&record)
            .await
            .with_context(|| format!("Failed to record task {}", record.task_id))?;
        info!("[{}] Event recorded ({}), status {}", record.task_id, outcome, record.status);

        let job_submitted = match event.to_job() {
            Some(job) => self.submit(job),
            None => false,
        };

        Ok(IngestOutcome {
            record: outcome,
            job_submitted,
        })
    }

    /// Queue a job directly
    pub fn submit(&self, job: Job) -> bool {
        self.dispatcher.submit(job)
    }

    /// Ingest newline-delimited JSON events until end of input
    pub async fn run_event_stream<R>(&self, reader: R) -> Result<IngestSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = IngestSummary::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await.context("Failed to read event stream")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event: TaskEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping malformed event: {}", e);
                    summary.malformed += 1;
                    continue;
                }
            };
            summary.events += 1;

            match self.ingest(&event).await {
                Ok(outcome) => {
                    if outcome.job_submitted {
                        summary.jobs_submitted += 1;
                    }
                }
                Err(e) => {
                    error!("[{}] Failed to ingest event: {:#}", event.task_id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Stop accepting jobs, wait for running work and close the pool. Idempotent.
    pub async fn shutdown(&self) -> DispatcherStats {
        self.dispatcher.shutdown().await;
        self.repository.pool().close_all();
        self.dispatcher.stats()
    }

    /// Dispatcher counters
    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Number of task retries waiting on their timer
    pub fn pending_retry_count(&self) -> usize {
        self.dispatcher.pending_retry_count()
    }

    /// Wait until no job is queued, running or waiting to be retried
    pub async fn wait_until_idle(&self, poll_interval: Duration) {
        while !self.dispatcher.is_idle() {
            debug!("Waiting for jobs: {} retries pending", self.dispatcher.pending_retry_count());
            tokio::time::sleep(poll_interval).await;
        }
        info!("All jobs settled");
    }
}
