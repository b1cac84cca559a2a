/*!
 * Remote operations used by the task pipeline.
 *
 * This module contains the client implementations for the three external
 * collaborators of a translation job:
 * - `document`: fetches the source subtitle document over HTTP
 * - `gemini`: calls the streaming translation API
 * - `storage`: publishes the translated document to object storage
 * - `mock`: in-process doubles used by tests
 *
 * Fetch and translate are wrapped by `retry_call`, which implements the
 * per-call retry budget with exponential backoff and jitter.
 */

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;
use rand::Rng;
use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ProviderError;

/// Source of subtitle documents
#[async_trait]
pub trait DocumentSource: Send + Sync + Debug {
    /// Download `url` into `work_dir/file_name`.
    ///
    /// On success the file exists and belongs to the caller, who must remove it.
    /// On failure nothing is left behind.
    async fn fetch(&self, url: &str, work_dir: &Path, file_name: &str) -> Result<PathBuf, ProviderError>;
}

/// Translation backend taking line-tagged text and returning line-tagged text
#[async_trait]
pub trait Translator: Send + Sync + Debug {
    /// Translate the tagged text
    async fn translate(&self, tagged_text: &str) -> Result<String, ProviderError>;
}

/// Publish target for translated documents
#[async_trait]
pub trait Publisher: Send + Sync + Debug {
    /// Store `payload` next to `source_url` and return its retrievable URL
    async fn publish(
        &self,
        task_id: &str,
        source_url: &str,
        file_name: &str,
        payload: Bytes,
    ) -> Result<String, ProviderError>;
}

/// Per-call retry budget with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Exponential base: attempt `k` waits `base^k` time units
    pub backoff_base: f64,
    /// Upper bound of the un-jittered delay
    pub backoff_cap: Duration,
    /// Jitter ratio applied symmetrically around the delay (0.2 = ±20%)
    pub jitter: f64,
    /// Length of one backoff unit (one second in production)
    pub time_unit: Duration,
}

impl RetryPolicy {
    /// Defaults for downloading source documents
    pub fn for_fetch() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: 1.5,
            backoff_cap: Duration::from_secs(30),
            jitter: 0.2,
            time_unit: Duration::from_secs(1),
        }
    }

    /// Defaults for the translation API
    pub fn for_translation() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: 2.0,
            backoff_cap: Duration::from_secs(60),
            jitter: 0.1,
            time_unit: Duration::from_secs(1),
        }
    }

    /// Un-jittered delay before attempt `attempt` (0-based; attempt 0 never waits)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let units = self.backoff_base.powi(exponent);
        let cap_units = self.backoff_cap.as_secs_f64() / self.time_unit.as_secs_f64().max(f64::EPSILON);
        self.time_unit.mul_f64(units.min(cap_units))
    }

    /// Delay before attempt `attempt` with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() || self.jitter <= 0.0 {
            return base;
        }

        let factor = rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + factor).max(0.0))
    }
}

/// Run `call` under `policy`.
///
/// Fatal errors (client-side statuses) abort immediately and are returned as-is.
/// Everything else is retried until the budget is spent, after which an
/// `Exhausted` error carrying the last cause is returned.
pub async fn retry_call<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            warn!(
                "{} retry {}/{}, waiting {:.1}s",
                operation,
                attempt + 1,
                attempts,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }

        match call(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() => {
                warn!("{} aborted on attempt {}: {}", operation, attempt + 1, e);
                return Err(e);
            }
            Err(e) => {
                warn!("{} attempt {}/{} failed: {}", operation, attempt + 1, attempts, e);
                last_error = Some(e);
            }
        }
    }

    Err(ProviderError::Exhausted {
        operation,
        attempts,
        last: Box::new(last_error.unwrap_or(ProviderError::NetworkError("no attempt was made".to_string()))),
    })
}

/// Build `builder`, falling back to a default client (and its default timeouts) on error
pub fn build_client(builder: reqwest::ClientBuilder, purpose: &str) -> reqwest::Client {
    builder.build().unwrap_or_else(|e| {
        warn!("Failed to build {} HTTP client, falling back to defaults without the configured timeout: {}", purpose, e);
        reqwest::Client::new()
    })
}

/// Map a response status onto the error taxonomy; `Ok` for 2xx
pub fn check_status(status: reqwest::StatusCode, url: &str) -> Result<(), ProviderError> {
    if status.is_success() {
        return Ok(());
    }

    let code = status.as_u16();
    match code {
        400 | 401 | 403 | 404 => Err(ProviderError::ClientError {
            status: code,
            url: url.to_string(),
        }),
        429 => Err(ProviderError::RateLimited(url.to_string())),
        500..=599 => Err(ProviderError::ServerError {
            status: code,
            message: status.canonical_reason().unwrap_or("server error").to_string(),
        }),
        _ => Err(ProviderError::UnexpectedStatus {
            status: code,
            url: url.to_string(),
        }),
    }
}

pub mod document;
pub mod gemini;
pub mod storage;
pub mod mock;
