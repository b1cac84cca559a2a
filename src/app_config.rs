use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};
use log::warn;

use crate::file_utils::FileManager;
use crate::providers::gemini::PROMPT_PLACEHOLDER;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Task database and connection pool
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Source document download
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Translation API
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Publish target
    #[serde(default)]
    pub storage: StorageConfig,

    /// Worker pool and task-level retries
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Database settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    // @field: SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    // @field: Pool capacity
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    // @field: Wait for a free pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    // @field: Attempts per operation on transient failures
    #[serde(default = "default_db_max_attempts")]
    pub max_attempts: u32,

    // @field: Linear backoff step between attempts
    #[serde(default = "default_db_retry_backoff_secs")]
    pub retry_backoff_secs: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            max_attempts: default_db_max_attempts(),
            retry_backoff_secs: default_db_retry_backoff_secs(),
        }
    }
}

/// Source document download settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchConfig {
    // @field: Per-request timeout
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Attempts per download
    #[serde(default = "default_call_max_attempts")]
    pub max_attempts: u32,

    // @field: Exponential backoff base
    #[serde(default = "default_fetch_backoff_base")]
    pub backoff_base: f64,

    // @field: Backoff cap
    #[serde(default = "default_fetch_backoff_cap_secs")]
    pub backoff_cap_secs: f64,

    // @field: Jitter ratio
    #[serde(default = "default_fetch_jitter")]
    pub jitter: f64,

    // @field: Largest accepted document
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_attempts: default_call_max_attempts(),
            backoff_base: default_fetch_backoff_base(),
            backoff_cap_secs: default_fetch_backoff_cap_secs(),
            jitter: default_fetch_jitter(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// Translation API settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    // @field: API base URL
    #[serde(default = "default_translation_endpoint")]
    pub endpoint: String,

    // @field: Model name
    #[serde(default = "default_translation_model")]
    pub model: String,

    // @field: API key
    #[serde(default)]
    pub api_key: String,

    // @field: Per-request timeout
    #[serde(default = "default_translation_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Attempts per translation call
    #[serde(default = "default_call_max_attempts")]
    pub max_attempts: u32,

    // @field: Exponential backoff base
    #[serde(default = "default_translation_backoff_base")]
    pub backoff_base: f64,

    // @field: Backoff cap
    #[serde(default = "default_translation_backoff_cap_secs")]
    pub backoff_cap_secs: f64,

    // @field: Jitter ratio
    #[serde(default = "default_translation_jitter")]
    pub jitter: f64,

    // @field: Prompt template, must contain `{text}`
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_translation_endpoint(),
            model: default_translation_model(),
            api_key: String::new(),
            timeout_secs: default_translation_timeout_secs(),
            max_attempts: default_call_max_attempts(),
            backoff_base: default_translation_backoff_base(),
            backoff_cap_secs: default_translation_backoff_cap_secs(),
            jitter: default_translation_jitter(),
            prompt: default_prompt(),
        }
    }
}

/// Publish target settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    // @field: Public base URL of the bucket
    #[serde(default)]
    pub base_url: String,

    // @field: Prefix for the final key segment
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    // @field: Key directory for sources outside the bucket
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: String,

    // @field: Optional bearer token for uploads
    #[serde(default)]
    pub auth_token: Option<String>,

    // @field: Upload timeout
    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            key_prefix: default_key_prefix(),
            fallback_dir: default_fallback_dir(),
            auth_token: None,
            timeout_secs: default_upload_timeout_secs(),
        }
    }
}

/// Worker pool and task-level retry settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobsConfig {
    // @field: Parallel workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    // @field: Re-submissions allowed per task
    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,

    // @field: Directory for downloaded and rendered documents
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    // @field: Base of the task retry delay
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: f64,

    // @field: Task retry delay cap
    #[serde(default = "default_retry_cap_secs")]
    pub retry_cap_secs: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_task_retries: default_max_task_retries(),
            work_dir: default_work_dir(),
            retry_base_secs: default_retry_base_secs(),
            retry_cap_secs: default_retry_cap_secs(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<&LogLevel> for log::LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("subtrans")
        .join("subtrans.db")
}

fn default_workers() -> usize {
    3
}

fn default_max_connections() -> usize {
    default_workers() + 2
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_db_max_attempts() -> u32 {
    3
}

fn default_db_retry_backoff_secs() -> f64 {
    2.0
}

fn default_fetch_timeout_secs() -> u64 {
    120
}

fn default_call_max_attempts() -> u32 {
    5
}

fn default_fetch_backoff_base() -> f64 {
    1.5
}

fn default_fetch_backoff_cap_secs() -> f64 {
    30.0
}

fn default_fetch_jitter() -> f64 {
    0.2
}

fn default_max_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_translation_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_translation_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_translation_timeout_secs() -> u64 {
    180
}

fn default_translation_backoff_base() -> f64 {
    2.0
}

fn default_translation_backoff_cap_secs() -> f64 {
    60.0
}

fn default_translation_jitter() -> f64 {
    0.1
}

fn default_prompt() -> String {
    "You are a professional subtitle translator. Translate the following Chinese subtitles \
     into natural, fluent English.\n\
     Every line starts with a marker such as [LINE_12]. Keep each marker exactly as it is, \
     translate only the text after it, output one line per marker and nothing else.\n\n\
     {text}"
        .to_string()
}

fn default_key_prefix() -> String {
    "en_".to_string()
}

fn default_fallback_dir() -> String {
    "en_subtitles".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    60
}

fn default_max_task_retries() -> u32 {
    3
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("subtrans")
}

fn default_retry_base_secs() -> f64 {
    60.0
}

fn default_retry_cap_secs() -> f64 {
    1800.0
}

// @const: Longest accepted delay setting (one week)
const MAX_DELAY_SECS: f64 = 7.0 * 24.0 * 3600.0;

// Delays feed `Duration::from_secs_f64`: finite, non-negative and bounded
fn validate_delay_secs(name: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&secs) {
        return Err(anyhow!("{} must be between 0 and {} seconds, got {}", name, MAX_DELAY_SECS, secs));
    }
    Ok(())
}

impl Config {
    /// Load the configuration at `path`, writing the defaults there if the file is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open config file: {:?}", path))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            return Ok(config);
        }

        warn!("Config file not found at {:?}, creating default config.", path);
        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        FileManager::write_to_file(path, &config_json)
            .with_context(|| format!("Failed to write default config to file: {:?}", path))?;

        Ok(config)
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.jobs.workers == 0 {
            return Err(anyhow!("jobs.workers must be at least 1"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.database.max_connections < self.jobs.workers {
            warn!(
                "database.max_connections ({}) is below jobs.workers ({}); workers may wait for connections",
                self.database.max_connections, self.jobs.workers
            );
        }
        if self.fetch.max_attempts == 0 || self.translation.max_attempts == 0 || self.database.max_attempts == 0 {
            return Err(anyhow!("max_attempts settings must be at least 1"));
        }
        for (name, jitter) in [("fetch.jitter", self.fetch.jitter), ("translation.jitter", self.translation.jitter)] {
            if !(0.0..1.0).contains(&jitter) {
                return Err(anyhow!("{} must be in [0, 1), got {}", name, jitter));
            }
        }
        for (name, secs) in [
            ("database.retry_backoff_secs", self.database.retry_backoff_secs),
            ("fetch.backoff_cap_secs", self.fetch.backoff_cap_secs),
            ("translation.backoff_cap_secs", self.translation.backoff_cap_secs),
            ("jobs.retry_base_secs", self.jobs.retry_base_secs),
            ("jobs.retry_cap_secs", self.jobs.retry_cap_secs),
        ] {
            validate_delay_secs(name, secs)?;
        }
        for (name, base) in [
            ("fetch.backoff_base", self.fetch.backoff_base),
            ("translation.backoff_base", self.translation.backoff_base),
        ] {
            if !base.is_finite() || base <= 0.0 {
                return Err(anyhow!("{} must be a positive number, got {}", name, base));
            }
        }
        if self.fetch.max_bytes == 0 {
            return Err(anyhow!("fetch.max_bytes must be positive"));
        }

        url::Url::parse(&self.translation.endpoint)
            .with_context(|| format!("Invalid translation endpoint: {}", self.translation.endpoint))?;
        if self.translation.api_key.trim().is_empty() {
            return Err(anyhow!("Translation API key is required (translation.api_key)"));
        }
        if !self.translation.prompt.contains(PROMPT_PLACEHOLDER) {
            return Err(anyhow!("translation.prompt must contain the {} placeholder", PROMPT_PLACEHOLDER));
        }

        if self.storage.base_url.trim().is_empty() {
            return Err(anyhow!("storage.base_url is required"));
        }
        url::Url::parse(&self.storage.base_url)
            .with_context(|| format!("Invalid storage base URL: {}", self.storage.base_url))?;

        Ok(())
    }
}
