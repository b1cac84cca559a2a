/*!
 * Tests for configuration loading and validation
 */

use anyhow::Result;

use subtrans::app_config::{Config, LogLevel};
use subtrans::jobs::TaskRetryPolicy;
use subtrans::providers::RetryPolicy;
use crate::common;

fn valid_config() -> Config {
    let mut config = Config::default();
    config.translation.api_key = "test-key".to_string();
    config.storage.base_url = "https://bucket.example.com".to_string();
    config
}

#[test]
fn test_validate_withPromptWithoutPlaceholder_shouldFail() {
    let mut config = valid_config();
    config.translation.prompt = "Translate this".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withBadUrlsOrJitter_shouldFail() {
    let mut config = valid_config();
    config.storage.base_url = "not a url".to_string();
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.fetch.jitter = 1.5;
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.jobs.workers = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_load_or_create_withExistingFile_shouldReadIt() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("conf.json");
    std::fs::write(
        &path,
        r#"{"storage":{"base_url":"https://bucket.example.com"},"translation":{"api_key":"k"},"log_level":"warn"}"#,
    )?;

    let config = Config::load_or_create(&path)?;
    config.validate()?;
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.translation.max_attempts, 5);
    Ok(())
}

#[test]
fn test_policies_fromDefaultConfig_shouldMatchBuiltInDefaults() {
    let config = Config::default();

    let fetch = RetryPolicy::from(&config.fetch);
    let built_in = RetryPolicy::for_fetch();
    assert_eq!(fetch.max_attempts, built_in.max_attempts);
    assert_eq!(fetch.backoff_cap, built_in.backoff_cap);

    let translation = RetryPolicy::from(&config.translation);
    assert_eq!(translation.backoff_base, RetryPolicy::for_translation().backoff_base);

    let jobs = TaskRetryPolicy::from(&config.jobs);
    assert_eq!(jobs.delay_for(0), TaskRetryPolicy::default().delay_for(0));
    assert_eq!(jobs.unknown_retry_limit, 2);
}

#[test]
fn test_validate_withNegativeOrNonFiniteDelays_shouldFail() {
    let cases: Vec<fn(&mut Config)> = vec![
        |c| c.jobs.retry_base_secs = -1.0,
        |c| c.jobs.retry_cap_secs = f64::INFINITY,
        |c| c.fetch.backoff_cap_secs = f64::NAN,
        |c| c.translation.backoff_cap_secs = -0.5,
        |c| c.database.retry_backoff_secs = f64::NEG_INFINITY,
        |c| c.jobs.retry_cap_secs = 1e300,
        |c| c.fetch.backoff_base = -2.0,
    ];

    for (index, apply) in cases.into_iter().enumerate() {
        let mut config = valid_config();
        apply(&mut config);
        assert!(config.validate().is_err(), "case {} should be rejected", index);
    }
}

#[test]
fn test_policies_fromValidatedConfig_shouldBuildWithoutPanicking() -> Result<()> {
    let mut config = valid_config();
    config.jobs.retry_base_secs = 1.0;
    config.jobs.retry_cap_secs = 0.25;
    config.validate()?;

    let jobs = TaskRetryPolicy::from(&config.jobs);
    assert_eq!(jobs.delay_for(3), std::time::Duration::from_millis(250));
    let _ = RetryPolicy::from(&config.fetch);
    let _ = RetryPolicy::from(&config.translation);
    Ok(())
}
