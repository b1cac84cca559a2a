/*!
 * End-to-end tests of the task pipeline
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subtrans::classifier::FailureClass;
use subtrans::database::{TaskRecord, TaskRepository};
use subtrans::jobs::{Dispatcher, Job, JobOutcome, TaskPipeline, TaskRetryPolicy};
use subtrans::providers::document::HttpDocumentFetcher;
use subtrans::providers::gemini::GeminiTranslator;
use subtrans::providers::mock::{MockBehavior, MockDocumentSource, MockFailure, MockTranslator, RecordingPublisher};
use subtrans::providers::storage::ObjectStorePublisher;
use subtrans::subtitle_processor::SubtitleDocument;
use crate::common;
use crate::common::mock_servers::EchoTranslationResponder;

const SOURCE_PATH: &str = "/bucket/sub/ep1.srt";
const TARGET_PATH: &str = "/bucket/sub/en_ep1.srt";

/// Pipeline talking HTTP to `server` for every remote operation
fn http_pipeline(server: &MockServer, repository: TaskRepository, work_dir: &Path) -> TaskPipeline {
    let fetcher = HttpDocumentFetcher::new(Duration::from_secs(5), common::fast_retry_policy(5), 1 << 20);
    let translator = GeminiTranslator::new(
        server.uri(),
        "gemini-test",
        "k",
        "{text}",
        Duration::from_secs(5),
        common::fast_retry_policy(3),
    );
    let publisher = ObjectStorePublisher::new(
        format!("{}/bucket", server.uri()),
        "en_",
        "en_subtitles",
        None,
        Duration::from_secs(5),
    );

    TaskPipeline::new(
        Arc::new(fetcher),
        Arc::new(translator),
        Arc::new(publisher),
        repository,
        work_dir,
        TaskRetryPolicy::default(),
    )
}

async fn mount_translation_and_storage(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(EchoTranslationResponder)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path(TARGET_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn count_requests(server: &MockServer, verb: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.as_str() == verb)
        .count()
}

fn assert_work_dir_empty(work_dir: &Path) -> Result<()> {
    assert_eq!(std::fs::read_dir(work_dir)?.count(), 0, "work dir should be empty");
    Ok(())
}

/// Fetch, translate, publish and persist with every entry intact
#[tokio::test]
async fn test_pipeline_withHealthyRemotes_shouldPublishAndRecordUrl() -> Result<()> {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::sample_document(10)))
        .mount(&server)
        .await;
    mount_translation_and_storage(&server).await;

    let temp_dir = common::create_temp_dir()?;
    let work_dir = temp_dir.path().join("work");
    let repository = common::open_repository(temp_dir.path(), 2)?;
    let source_url = format!("{}{}", server.uri(), SOURCE_PATH);

    let mut record = TaskRecord::new("ep1");
    record.status = "FINISH".to_string();
    record.source_subtitle_url = source_url.clone();
    repository.upsert_task(&record).await?;

    let pipeline = http_pipeline(&server, repository.clone(), &work_dir);
    let outcome = pipeline.run(Job::new("ep1", source_url, "alice")).await;

    let expected_url = format!("{}{}", server.uri(), TARGET_PATH);
    assert_eq!(outcome, JobOutcome::Completed { translated_url: expected_url.clone() });

    let stored = repository.get_task("ep1").await?.expect("record should exist");
    assert_eq!(stored.translated_subtitle_url, expected_url);

    let requests = server.received_requests().await.unwrap_or_default();
    let upload = requests
        .iter()
        .find(|request| request.method.as_str() == "PUT")
        .expect("an upload should have been made");
    let published = SubtitleDocument::parse(&String::from_utf8_lossy(&upload.body))?;
    assert_eq!(published.len(), 10);
    for entry in &published.entries {
        assert_eq!(entry.text, common::expected_round_trip_text(entry.seq_num));
        assert_eq!(
            entry.timestamp,
            format!("00:00:{:02},000 --> 00:00:{:02},500", entry.seq_num, entry.seq_num)
        );
    }

    assert_work_dir_empty(&work_dir)
}

/// A missing source is abandoned after one request, with no task retry
#[tokio::test]
async fn test_pipeline_withNotFoundSource_shouldAbandonWithoutRetry() -> Result<()> {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp_dir = common::create_temp_dir()?;
    let work_dir = temp_dir.path().join("work");
    let repository = common::open_repository(temp_dir.path(), 2)?;
    let source_url = format!("{}/missing.srt", server.uri());

    let pipeline = http_pipeline(&server, repository, &work_dir);
    match pipeline.run(Job::new("gone", source_url.clone(), "alice")).await {
        JobOutcome::Abandoned { class, reason } => {
            assert_eq!(class, FailureClass::Permanent);
            assert!(reason.contains("fetching"), "reason: {}", reason);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let dispatcher = Dispatcher::start(Arc::new(pipeline), 1);
    assert!(dispatcher.submit(Job::new("gone", source_url, "alice")));
    dispatcher.shutdown().await;

    let stats = dispatcher.stats();
    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.retries_scheduled, 0);
    assert_eq!(count_requests(&server, "GET").await, 2);

    assert_work_dir_empty(&work_dir)
}

/// Transient download failures are absorbed by the per-call retry budget
#[tokio::test]
async fn test_pipeline_withThreeUnavailableResponses_shouldSucceedOnFourthRequest() -> Result<()> {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SOURCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::sample_document(4)))
        .mount(&server)
        .await;
    mount_translation_and_storage(&server).await;

    let temp_dir = common::create_temp_dir()?;
    let work_dir = temp_dir.path().join("work");
    let repository = common::open_repository(temp_dir.path(), 2)?;
    let source_url = format!("{}{}", server.uri(), SOURCE_PATH);

    let mut record = TaskRecord::new("ep1");
    record.source_subtitle_url = source_url.clone();
    repository.upsert_task(&record).await?;

    let pipeline = http_pipeline(&server, repository, &work_dir);
    let outcome = pipeline.run(Job::new("ep1", source_url, "alice")).await;

    assert!(matches!(outcome, JobOutcome::Completed { .. }), "outcome: {:?}", outcome);
    assert_eq!(count_requests(&server, "GET").await, 4);

    assert_work_dir_empty(&work_dir)
}

/// Entries the translator drops are left out of the published document
#[tokio::test]
async fn test_pipeline_withDroppedEntries_shouldPublishLossyDocument() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let work_dir = temp_dir.path().join("work");
    let repository = common::open_repository(temp_dir.path(), 2)?;
    repository.upsert_task(&TaskRecord::new("lossy")).await?;

    let publisher = Arc::new(RecordingPublisher::new());
    let pipeline = TaskPipeline::new(
        Arc::new(MockDocumentSource::serving(common::sample_document(10))),
        Arc::new(MockTranslator::new(MockBehavior::DropEven)),
        publisher.clone(),
        repository,
        &work_dir,
        TaskRetryPolicy::default(),
    );

    let outcome = pipeline.run(Job::new("lossy", "https://cdn.example.com/a.srt", "bob")).await;
    assert!(matches!(outcome, JobOutcome::Completed { .. }), "outcome: {:?}", outcome);

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    let document = SubtitleDocument::parse(&String::from_utf8_lossy(&published[0].payload))?;
    let numbers: Vec<u32> = document.entries.iter().map(|entry| entry.seq_num).collect();
    assert_eq!(numbers, vec![1, 3, 5, 7, 9]);
    assert_eq!(document.entries[0].text, "EN 1");

    assert_work_dir_empty(&work_dir)
}

/// Publishing succeeds but the record is missing: unknown failure, retried later
#[tokio::test]
async fn test_pipeline_withMissingRecord_shouldScheduleTaskRetry() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let work_dir = temp_dir.path().join("work");
    let repository = common::open_repository(temp_dir.path(), 2)?;

    let pipeline = TaskPipeline::new(
        Arc::new(MockDocumentSource::serving(common::sample_document(2))),
        Arc::new(MockTranslator::echo()),
        Arc::new(RecordingPublisher::new()),
        repository,
        &work_dir,
        TaskRetryPolicy::default(),
    );

    match pipeline.run(Job::new("orphan", "https://cdn.example.com/a.srt", "bob")).await {
        JobOutcome::Retry { job, delay } => {
            assert_eq!(job.retry_count, 1);
            assert_eq!(delay, Duration::from_secs(120));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_work_dir_empty(&work_dir)
}

/// A retryable failure on the last allowed retry is abandoned
#[tokio::test]
async fn test_pipeline_withRetryBudgetSpent_shouldAbandonRetryableFailure() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let work_dir = temp_dir.path().join("work");
    let repository = common::open_repository(temp_dir.path(), 2)?;

    let translator = Arc::new(MockTranslator::new(MockBehavior::Failing(MockFailure::Status(503))));
    let pipeline = TaskPipeline::new(
        Arc::new(MockDocumentSource::serving(common::sample_document(2))),
        translator.clone(),
        Arc::new(RecordingPublisher::new()),
        repository,
        &work_dir,
        TaskRetryPolicy::default(),
    );

    let mut job = Job::new("tired", "https://cdn.example.com/a.srt", "bob");
    job.retry_count = 3;

    match pipeline.run(job).await {
        JobOutcome::Abandoned { class, .. } => assert_eq!(class, FailureClass::Retryable),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(translator.call_count(), 1);

    assert_work_dir_empty(&work_dir)
}
