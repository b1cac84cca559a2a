use std::time::Duration;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use reqwest::{Client, header};
use log::{debug, info};

use crate::app_config::TranslationConfig;
use crate::errors::ProviderError;

use super::{build_client, check_status, retry_call, RetryPolicy, Translator};

/// Placeholder replaced by the tagged text in the prompt template
pub const PROMPT_PLACEHOLDER: &str = "{text}";

/// Streaming client for the Gemini `streamGenerateContent` endpoint
#[derive(Debug, Clone)]
pub struct GeminiTranslator {
    /// HTTP client for API requests
    client: Client,
    /// API base URL, without the `/v1beta/...` path
    endpoint: String,
    /// Model name
    model: String,
    /// API key for authentication
    api_key: String,
    /// Prompt template containing `{text}`
    prompt: String,
    /// Per-call retry budget
    policy: RetryPolicy,
}

/// Gemini generate request
#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    /// Conversation contents
    pub contents: Vec<GenerateContent>,
}

/// One content block of a request or candidate
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GenerateContent {
    /// Text parts
    #[serde(default)]
    pub parts: Vec<GeneratePart>,
}

/// Single text part
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GeneratePart {
    /// Text payload
    #[serde(default)]
    pub text: String,
}

/// One event of the streamed response
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    /// Response candidates, only the first one is used
    #[serde(default)]
    pub candidates: Vec<StreamCandidate>,
}

/// Response candidate
#[derive(Debug, Deserialize)]
pub struct StreamCandidate {
    /// Candidate content
    #[serde(default)]
    pub content: GenerateContent,
}

impl StreamChunk {
    /// First text fragment of the first candidate
    pub fn fragment(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.as_str())
    }
}

/// Incremental decoder for `data:` lines of a server-sent event stream.
///
/// Network chunks may split a line anywhere, so an incomplete tail is kept
/// until the next chunk or `finish` arrives.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    pending: Vec<u8>,
    text: String,
    fragments: usize,
}

impl SseAccumulator {
    /// Feed raw bytes from the stream
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            self.consume_line(&line);
        }
    }

    /// Flush the trailing line and return the concatenated text
    pub fn finish(mut self) -> (String, usize) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.consume_line(&line);
        }
        (self.text, self.fragments)
    }

    fn consume_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let Some(payload) = line.trim().strip_prefix("data:") else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => {
                if let Some(fragment) = chunk.fragment() {
                    self.text.push_str(fragment);
                    self.fragments += 1;
                }
            }
            Err(e) => debug!("Skipping undecodable stream event: {}", e),
        }
    }
}

impl GeminiTranslator {
    /// Create a new client
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        prompt: impl Into<String>,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client: build_client(
                Client::builder()
                    .timeout(timeout)
                    .pool_idle_timeout(Duration::from_secs(90))
                    .tcp_keepalive(Duration::from_secs(60)),
                "translation",
            ),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            prompt: prompt.into(),
            policy,
        }
    }

    /// Create a client from the `translation` configuration section
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.api_key.clone(),
            config.prompt.clone(),
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::from(config),
        )
    }

    /// Streaming endpoint URL for the configured model
    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.endpoint, self.model
        )
    }

    /// Build the request body for `tagged_text`
    pub fn build_request(&self, tagged_text: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: self.prompt.replace(PROMPT_PLACEHOLDER, tagged_text),
                }],
            }],
        }
    }

    async fn translate_once(&self, tagged_text: &str) -> Result<String, ProviderError> {
        let url = self.stream_url();
        let mut response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&self.build_request(tagged_text))
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        check_status(response.status(), &url)?;

        let mut accumulator = SseAccumulator::default();
        while let Some(chunk) = response.chunk().await.map_err(ProviderError::from_reqwest)? {
            accumulator.push(&chunk);
        }

        let (text, fragments) = accumulator.finish();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyTranslation);
        }

        info!("Translation stream finished: {} fragments, {} chars", fragments, text.chars().count());
        Ok(text)
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(&self, tagged_text: &str) -> Result<String, ProviderError> {
        retry_call(&self.policy, "Translation", |attempt| {
            debug!("Calling translation API with model {} (attempt {})", self.model, attempt + 1);
            self.translate_once(tagged_text)
        })
        .await
    }
}

impl From<&TranslationConfig> for RetryPolicy {
    fn from(config: &TranslationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
            backoff_cap: Duration::from_secs_f64(config.backoff_cap_secs),
            jitter: config.jitter,
            time_unit: Duration::from_secs(1),
        }
    }
}
