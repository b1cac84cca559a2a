/*!
 * Mock remote operations for testing.
 *
 * Each double counts its calls so tests can assert how often the pipeline
 * reached out:
 * - `MockDocumentSource`: serves a fixed document or fails with a status
 * - `MockTranslator`: echoes, rewrites, drops lines or fails
 * - `RecordingPublisher`: keeps every published payload in memory
 */

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{DocumentSource, Publisher, Translator};

/// Failure injected by a mock
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockFailure {
    /// Respond with this HTTP status
    Status(u16),
    /// Simulate a timeout
    Timeout,
}

impl MockFailure {
    fn to_error(self, url: &str) -> ProviderError {
        match self {
            MockFailure::Status(status @ (400 | 401 | 403 | 404)) => ProviderError::ClientError {
                status,
                url: url.to_string(),
            },
            MockFailure::Status(429) => ProviderError::RateLimited(url.to_string()),
            MockFailure::Status(status) if status >= 500 => ProviderError::ServerError {
                status,
                message: "Service Unavailable".to_string(),
            },
            MockFailure::Status(status) => ProviderError::UnexpectedStatus {
                status,
                url: url.to_string(),
            },
            MockFailure::Timeout => ProviderError::Timeout(format!("mock timeout for {}", url)),
        }
    }
}

/// Document source serving a fixed body
#[derive(Debug)]
pub struct MockDocumentSource {
    /// Body written on success
    content: String,
    /// Failure returned for the first `fail_first` calls, or always when `fail_first` is `usize::MAX`
    failure: Option<MockFailure>,
    /// Number of leading calls that fail
    fail_first: usize,
    /// Call counter
    calls: Arc<AtomicUsize>,
}

impl MockDocumentSource {
    /// Always serve `content`
    pub fn serving(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            failure: None,
            fail_first: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always fail
    pub fn failing(failure: MockFailure) -> Self {
        Self {
            content: String::new(),
            failure: Some(failure),
            fail_first: usize::MAX,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `times` calls, then serve `content`
    pub fn flaky(times: usize, failure: MockFailure, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            failure: Some(failure),
            fail_first: times,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of fetches so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for MockDocumentSource {
    async fn fetch(&self, url: &str, work_dir: &Path, file_name: &str) -> Result<PathBuf, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failure {
            if call < self.fail_first {
                return Err(failure.to_error(url));
            }
        }

        tokio::fs::create_dir_all(work_dir).await?;
        let destination = work_dir.join(file_name);
        tokio::fs::write(&destination, self.content.as_bytes()).await?;
        Ok(destination)
    }
}

/// Behavior mode for the mock translator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Return the input unchanged
    Echo,
    /// Keep the tags and replace each text with `EN <n>`
    Working,
    /// Drop every even-numbered line from the response
    DropEven,
    /// Return nothing
    Empty,
    /// Always fail
    Failing(MockFailure),
    /// Sleep before echoing
    Slow { delay_ms: u64 },
}

/// Mock translation backend
#[derive(Debug)]
pub struct MockTranslator {
    /// Behavior mode
    behavior: MockBehavior,
    /// Request counter
    calls: Arc<AtomicUsize>,
}

impl MockTranslator {
    /// Create a new mock translator with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Echoing translator
    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// Number of translate calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn rewrite(tagged_text: &str, keep: impl Fn(u32) -> bool) -> String {
        tagged_text
            .lines()
            .filter_map(|line| {
                let rest = line.strip_prefix("[LINE_")?;
                let (number, _) = rest.split_once(']')?;
                let seq_num: u32 = number.parse().ok()?;
                keep(seq_num).then(|| format!("[LINE_{}]EN {}", seq_num, seq_num))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, tagged_text: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            MockBehavior::Echo => Ok(tagged_text.to_string()),
            MockBehavior::Working => Ok(Self::rewrite(tagged_text, |_| true)),
            MockBehavior::DropEven => Ok(Self::rewrite(tagged_text, |n| n % 2 == 1)),
            MockBehavior::Empty => Err(ProviderError::EmptyTranslation),
            MockBehavior::Failing(failure) => Err(failure.to_error("mock://translate")),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(tagged_text.to_string())
            }
        }
    }
}

/// One publish call seen by `RecordingPublisher`
#[derive(Debug, Clone)]
pub struct PublishedObject {
    /// Task the payload belongs to
    pub task_id: String,
    /// Source document URL
    pub source_url: String,
    /// Local file name of the payload
    pub file_name: String,
    /// Uploaded bytes
    pub payload: Bytes,
}

/// Publisher keeping payloads in memory
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    /// Failure returned for every call, if set
    failure: Option<MockFailure>,
    /// Everything published so far
    published: Mutex<Vec<PublishedObject>>,
}

impl RecordingPublisher {
    /// Publisher that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher that always fails
    pub fn failing(failure: MockFailure) -> Self {
        Self {
            failure: Some(failure),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of published objects
    pub fn published(&self) -> Vec<PublishedObject> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        task_id: &str,
        source_url: &str,
        file_name: &str,
        payload: Bytes,
    ) -> Result<String, ProviderError> {
        let url = format!("mock://published/{}/{}", task_id, file_name);
        if let Some(failure) = self.failure {
            return Err(failure.to_error(&url));
        }

        self.published.lock().push(PublishedObject {
            task_id: task_id.to_string(),
            source_url: source_url.to_string(),
            file_name: file_name.to_string(),
            payload,
        });
        Ok(url)
    }
}
