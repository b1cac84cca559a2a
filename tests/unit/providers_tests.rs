/*!
 * Tests for the remote operations against wiremock servers
 */

use std::time::Duration;
use anyhow::Result;
use bytes::Bytes;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subtrans::errors::ProviderError;
use subtrans::providers::gemini::GeminiTranslator;
use subtrans::providers::storage::ObjectStorePublisher;
use subtrans::providers::{Publisher, Translator};
use crate::common;
use crate::common::mock_servers::{sse_event, EchoTranslationResponder};

const STREAM_PATH: &str = "/v1beta/models/gemini-test:streamGenerateContent";

fn translator(server: &MockServer, max_attempts: u32) -> GeminiTranslator {
    GeminiTranslator::new(
        server.uri(),
        "gemini-test",
        "test-key",
        "{text}",
        Duration::from_secs(5),
        common::fast_retry_policy(max_attempts),
    )
}

/// The streamed fragments are joined back into the tagged text
#[tokio::test]
async fn test_translate_withEchoStream_shouldReturnTaggedText() -> Result<()> {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(EchoTranslationResponder)
        .expect(1)
        .mount(&server)
        .await;

    let tagged = "[LINE_1]Hello\n[LINE_2]World\n[LINE_3]Again";
    let response = translator(&server, 3).translate(tagged).await?;

    assert_eq!(response, tagged);
    Ok(())
}

/// A 400 is fatal and must not be retried
#[tokio::test]
async fn test_translate_withBadRequest_shouldAbortAfterOneRequest() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let result = translator(&server, 5).translate("[LINE_1]Hello").await;

    assert!(matches!(result, Err(ProviderError::ClientError { status: 400, .. })));
}

/// A stream without any text fragment is an empty translation
#[tokio::test]
async fn test_translate_withEmptyStream_shouldExhaustWithEmptyTranslation() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_event("   ")),
        )
        .expect(2)
        .mount(&server)
        .await;

    let result = translator(&server, 2).translate("[LINE_1]Hello").await;

    match result {
        Err(ProviderError::Exhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, ProviderError::EmptyTranslation));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

/// Upload goes to the derived key with the bearer token attached
#[tokio::test]
async fn test_publish_withSourceInBucket_shouldPutNextToSource() -> Result<()> {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/sub/en_ep1.srt"))
        .and(header("authorization", "Bearer secret"))
        .and(body_string("1\n00:00:01,000 --> 00:00:02,000\nHi\n\n"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let base_url = format!("{}/bucket", server.uri());
    let publisher = ObjectStorePublisher::new(
        base_url.clone(),
        "en_",
        "en_subtitles",
        Some("secret".to_string()),
        Duration::from_secs(5),
    );

    let url = publisher
        .publish(
            "t1",
            &format!("{}/sub/ep1.srt", base_url),
            "t1_translated.srt",
            Bytes::from_static(b"1\n00:00:01,000 --> 00:00:02,000\nHi\n\n"),
        )
        .await?;

    assert_eq!(url, format!("{}/sub/en_ep1.srt", base_url));
    Ok(())
}

/// Storage rejecting the upload surfaces the status
#[tokio::test]
async fn test_publish_withForbidden_shouldReturnClientError() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let publisher = ObjectStorePublisher::new(server.uri(), "en_", "en_subtitles", None, Duration::from_secs(5));
    let result = publisher
        .publish("t9", "https://elsewhere.example.com/a.srt", "t9_translated.srt", Bytes::from_static(b"x"))
        .await;

    let error = result.unwrap_err();
    assert_eq!(error.status_code(), Some(403));
    assert!(error.to_string().contains("Forbidden (403)"));
}
