use std::path::{Path, PathBuf};
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, header};
use tokio::io::AsyncWriteExt;

use crate::app_config::FetchConfig;
use crate::errors::ProviderError;
use crate::subtitle_processor::looks_like_subtitles;

use super::{build_client, check_status, retry_call, DocumentSource, RetryPolicy};

/// Number of leading bytes kept to sniff the downloaded format
const SNIFF_BYTES: usize = 1000;

/// HTTP client downloading source subtitle documents
#[derive(Debug, Clone)]
pub struct HttpDocumentFetcher {
    /// HTTP client for requests
    client: Client,
    /// Per-call retry budget
    policy: RetryPolicy,
    /// Largest accepted body
    max_bytes: u64,
}

impl HttpDocumentFetcher {
    /// Create a fetcher with an explicit timeout, retry policy and size limit
    pub fn new(timeout: Duration, policy: RetryPolicy, max_bytes: u64) -> Self {
        Self {
            client: build_client(
                Client::builder()
                    .timeout(timeout)
                    .user_agent(concat!("subtrans/", env!("CARGO_PKG_VERSION")))
                    .pool_idle_timeout(Duration::from_secs(90))
                    .tcp_keepalive(Duration::from_secs(60)),
                "download",
            ),
            policy,
            max_bytes,
        }
    }

    /// Create a fetcher from the `fetch` configuration section
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::from(config),
            config.max_bytes,
        )
    }

    /// One download attempt, spooled into a temporary file next to the destination
    async fn fetch_once(&self, url: &str, work_dir: &Path, file_name: &str) -> Result<PathBuf, ProviderError> {
        let mut response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/plain,text/vtt,application/x-subrip,*/*")
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        check_status(response.status(), url)?;

        if let Some(declared) = response.content_length() {
            if declared == 0 {
                return Err(ProviderError::EmptyBody);
            }
            if declared > self.max_bytes {
                return Err(ProviderError::PayloadTooLarge {
                    bytes: declared,
                    limit: self.max_bytes,
                });
            }
        }

        tokio::fs::create_dir_all(work_dir).await?;

        // The temp path deletes itself on every early return below
        let spool = tempfile::Builder::new()
            .prefix(&format!("{}.", file_name))
            .suffix(".part")
            .tempfile_in(work_dir)?;
        let (file, spool_path) = spool.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut total: u64 = 0;
        let mut head = Vec::with_capacity(SNIFF_BYTES);
        while let Some(chunk) = response.chunk().await.map_err(ProviderError::from_reqwest)? {
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Err(ProviderError::PayloadTooLarge {
                    bytes: total,
                    limit: self.max_bytes,
                });
            }

            if head.len() < SNIFF_BYTES {
                let take = (SNIFF_BYTES - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }

            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if total == 0 {
            return Err(ProviderError::EmptyBody);
        }

        if !looks_like_subtitles(&String::from_utf8_lossy(&head)) {
            warn!("Downloaded document from {} does not look like a subtitle file", url);
        }

        let destination = work_dir.join(file_name);
        spool_path
            .persist(&destination)
            .map_err(|e| ProviderError::Io(e.error))?;

        info!("Subtitle downloaded: {:?} ({} bytes)", destination, total);
        Ok(destination)
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentFetcher {
    async fn fetch(&self, url: &str, work_dir: &Path, file_name: &str) -> Result<PathBuf, ProviderError> {
        retry_call(&self.policy, "Subtitle download", |attempt| {
            debug!("Downloading subtitle {} (attempt {})", url, attempt + 1);
            self.fetch_once(url, work_dir, file_name)
        })
        .await
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
            backoff_cap: Duration::from_secs_f64(config.backoff_cap_secs),
            jitter: config.jitter,
            time_unit: Duration::from_secs(1),
        }
    }
}
