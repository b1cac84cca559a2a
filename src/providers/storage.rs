use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use reqwest::{Client, header};
use url::Url;

use crate::app_config::StorageConfig;
use crate::errors::ProviderError;

use super::{build_client, check_status, Publisher};

/// Object storage publisher using plain HTTP PUT
#[derive(Debug, Clone)]
pub struct ObjectStorePublisher {
    /// HTTP client for uploads
    client: Client,
    /// Public base URL of the bucket, no trailing slash
    base_url: String,
    /// Prefix added to the final path segment of the source key
    key_prefix: String,
    /// Directory used when the source URL is not under `base_url`
    fallback_dir: String,
    /// Optional bearer token
    auth_token: Option<String>,
}

impl ObjectStorePublisher {
    /// Create a new publisher
    pub fn new(
        base_url: impl Into<String>,
        key_prefix: impl Into<String>,
        fallback_dir: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(Client::builder().timeout(timeout), "upload"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_prefix: key_prefix.into(),
            fallback_dir: fallback_dir.into().trim_matches('/').to_string(),
            auth_token: auth_token.filter(|token| !token.is_empty()),
        }
    }

    /// Create a publisher from the `storage` configuration section
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.key_prefix.clone(),
            config.fallback_dir.clone(),
            config.auth_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Object key for the translated document.
    ///
    /// The key mirrors the source key with the last path segment prefixed,
    /// so `sub/42/zh.srt` becomes `sub/42/en_zh.srt`. Sources outside the
    /// bucket land under `{fallback_dir}/{task_id}/{file_name}`.
    pub fn derive_object_key(&self, task_id: &str, source_url: &str, file_name: &str) -> String {
        let fallback = || format!("{}/{}/{}", self.fallback_dir, task_id, file_name);

        let Some(rest) = source_url.strip_prefix(&self.base_url) else {
            return fallback();
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            return fallback();
        }

        let path = rest
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_matches('/');
        if path.is_empty() {
            return fallback();
        }

        match path.rsplit_once('/') {
            Some((dir, last)) if !last.is_empty() => format!("{}/{}{}", dir, self.key_prefix, last),
            Some(_) => fallback(),
            None => format!("{}{}", self.key_prefix, path),
        }
    }

    /// Public URL of an object key
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl Publisher for ObjectStorePublisher {
    async fn publish(
        &self,
        task_id: &str,
        source_url: &str,
        file_name: &str,
        payload: Bytes,
    ) -> Result<String, ProviderError> {
        let key = self.derive_object_key(task_id, source_url, file_name);
        let url = self.object_url(&key);
        if Url::parse(&url).is_err() {
            warn!("Derived object URL does not parse: {}", url);
        }

        let size = payload.len();
        let mut request = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, "application/x-subrip; charset=utf-8")
            .body(payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(ProviderError::from_reqwest)?;
        check_status(response.status(), &url)?;

        info!("Published translated subtitle for task {}: {} ({} bytes)", task_id, url, size);
        Ok(url)
    }
}
