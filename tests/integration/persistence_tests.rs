/*!
 * Integration tests for the task repository and its connection pool
 */

use std::time::Duration;
use anyhow::Result;

use subtrans::database::{TaskRecord, UpsertOutcome};
use subtrans::errors::{DatabaseError, PoolError};
use crate::common;

fn finished_record(task_id: &str) -> TaskRecord {
    TaskRecord {
        task_id: task_id.to_string(),
        status: "FINISH".to_string(),
        create_time: "2024-05-01 10:00:00".to_string(),
        video_name: "show/ep1.mp4".to_string(),
        source_url: "https://media.example.com/show/ep1.mp4".to_string(),
        output_path: "/out/show/ep1.mp4".to_string(),
        source_subtitle_url: "https://cdn.example.com/sub/ep1.srt".to_string(),
        owner: "alice".to_string(),
        ..Default::default()
    }
}

/// Many writers sharing a small pool all land their rows
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upsert_withConcurrentWriters_shouldStoreEveryRecord() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let repository = common::open_repository(temp_dir.path(), 2)?;

    let mut handles = Vec::new();
    for n in 0..20 {
        let repository = repository.clone();
        handles.push(tokio::spawn(async move {
            repository.upsert_task(&finished_record(&format!("task-{}", n))).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await??, UpsertOutcome::Inserted);
    }

    for n in 0..20 {
        assert!(repository.task_exists(&format!("task-{}", n)).await?);
    }

    let status = repository.pool().status();
    assert_eq!(status.capacity, 2);
    assert!(status.active <= 2);
    assert_eq!(status.idle, status.active);
    Ok(())
}

/// Repeated events leave the row alone; a real change updates it
#[tokio::test]
async fn test_upsert_withRepeatedEvent_shouldBeIdempotent() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let repository = common::open_repository(temp_dir.path(), 2)?;
    let record = finished_record("t1");

    assert_eq!(repository.upsert_task(&record).await?, UpsertOutcome::Inserted);
    let first = repository.get_task("t1").await?.expect("row after insert");

    assert_eq!(repository.upsert_task(&record).await?, UpsertOutcome::Unchanged);
    let second = repository.get_task("t1").await?.expect("row after repeat");
    assert_eq!(first, second);

    let mut later = record.clone();
    later.status = "SUCCESS".to_string();
    later.create_time = "2030-01-01 00:00:00".to_string();
    later.source_subtitle_url = String::new();
    assert_eq!(repository.upsert_task(&later).await?, UpsertOutcome::Updated);

    let stored = repository.get_task("t1").await?.expect("row after update");
    assert_eq!(stored.status, "SUCCESS");
    assert_eq!(stored.create_time, "2024-05-01 10:00:00");
    assert_eq!(stored.source_subtitle_url, "https://cdn.example.com/sub/ep1.srt");
    Ok(())
}

/// The published URL survives a later event that does not carry one
#[tokio::test]
async fn test_update_translated_url_thenRepeatedEvent_shouldKeepUrl() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let repository = common::open_repository(temp_dir.path(), 2)?;

    repository.upsert_task(&finished_record("t2")).await?;
    repository
        .update_translated_url("t2", "https://bucket.example.com/sub/en_ep1.srt")
        .await?;
    repository.upsert_task(&finished_record("t2")).await?;

    let stored = repository.get_task("t2").await?.expect("row");
    assert_eq!(stored.translated_subtitle_url, "https://bucket.example.com/sub/en_ep1.srt");

    let missing = repository.update_translated_url("nope", "https://x").await;
    assert!(matches!(missing, Err(DatabaseError::TaskNotFound(_))));
    Ok(())
}

/// A held connection released mid-retry lets the operation through
#[tokio::test]
async fn test_execute_withPoolBrieflyExhausted_shouldSucceedOnRetry() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let repository = common::open_repository(temp_dir.path(), 1)?;
    repository.upsert_task(&finished_record("t3")).await?;

    let held = repository.pool().acquire(Duration::from_millis(100))?;
    let holder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(700));
        drop(held);
    });

    assert!(repository.task_exists("t3").await?);
    holder.join().expect("holder thread panicked");
    Ok(())
}

/// A connection held for the whole retry budget exhausts the pool
#[tokio::test]
async fn test_execute_withPoolHeldThroughout_shouldReportExhausted() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let repository = common::open_repository(temp_dir.path(), 1)?;

    let held = repository.pool().acquire(Duration::from_millis(100))?;
    let result = repository.task_exists("t4").await;
    drop(held);

    assert!(matches!(result, Err(DatabaseError::Pool(PoolError::Exhausted { capacity: 1, .. }))));
    Ok(())
}

/// Closing the pool drops every connection
#[tokio::test]
async fn test_close_all_shouldResetPoolStatus() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let repository = common::open_repository(temp_dir.path(), 2)?;
    repository.upsert_task(&finished_record("t5")).await?;

    repository.pool().close_all();

    let status = repository.pool().status();
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 0);
    Ok(())
}
