/*!
 * Common test utilities for the subtrans test suite
 */

use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use anyhow::Result;
use tempfile::TempDir;

use subtrans::database::{DbRetryPolicy, TaskRepository};
use subtrans::providers::RetryPolicy;

// Re-export the wiremock helpers
pub mod mock_servers;

static INIT_LOGGING: Once = Once::new();

/// Route `log` output through env_logger once per test binary
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Subtitle document with `count` entries. Odd entries carry surrounding
/// punctuation that the decoder trims, even entries end with `?`.
pub fn sample_document(count: u32) -> String {
    let mut document = String::new();
    for n in 1..=count {
        let text = if n % 2 == 1 {
            format!("\"Hello {}.\"", n)
        } else {
            format!("Why {}?", n)
        };
        document.push_str(&format!(
            "{}\n00:00:{:02},000 --> 00:00:{:02},500\n{}\n\n",
            n,
            n,
            n,
            text
        ));
    }
    document
}

/// Text of entry `n` of `sample_document` after a round trip through the decoder
pub fn expected_round_trip_text(n: u32) -> String {
    if n % 2 == 1 {
        format!("Hello {}", n)
    } else {
        format!("Why {}?", n)
    }
}

/// Per-call policy with millisecond backoff units
pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: 1.5,
        backoff_cap: Duration::from_millis(20),
        jitter: 0.2,
        time_unit: Duration::from_millis(1),
    }
}

/// Database retry policy with millisecond backoff
pub fn fast_db_policy() -> DbRetryPolicy {
    DbRetryPolicy {
        max_attempts: 3,
        backoff_step: Duration::from_millis(10),
        acquire_timeout: Duration::from_millis(500),
    }
}

/// Repository backed by a database file inside `dir`
pub fn open_repository(dir: &Path, capacity: usize) -> Result<TaskRepository> {
    Ok(TaskRepository::open(&dir.join("tasks.db"), capacity, fast_db_policy())?)
}
