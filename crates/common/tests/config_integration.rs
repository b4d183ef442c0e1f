//! Integration tests for config module
//!
//! Loads complete settings documents and checks they produce the same
//! runtime types, and the same validation errors, as the builders.

#![cfg(feature = "foundation")]

use std::time::Duration;

use anyhow::Result;
use ec2utils_common::config::{ResilienceSettings, RetrySettings};
use ec2utils_common::error::{ConfigurationError, ErrorKind};
use ec2utils_common::resilience::{RecordingSleeper, RetryExecutor, RetryPolicy};

const DOCUMENT: &str = r#"
[retry]
max_attempts = 4
initial_delay_secs = 0.25
backoff_factor = 3.0
delay_ceiling_secs = 1.0
reraise_on = ["permission_denied", "invalid_input"]
suppress_on = ["throttled"]

[timeout]
deadline = 1500
force_kill = false
"#;

/// Verifies a full settings document converts into a working policy.
///
/// # Test Steps
/// 1. Parse the document
/// 2. Convert `[retry]` into a `RetryPolicy`
/// 3. Verify the policy matches the equivalent builder call and sleeps the
///    clamped schedule
#[test]
fn test_document_to_policy() -> Result<()> {
    let settings = ResilienceSettings::from_toml_str(DOCUMENT)?;
    let policy = RetryPolicy::try_from(&settings.retry)?;

    let expected = RetryPolicy::builder()
        .max_attempts(4)
        .initial_delay(Duration::from_millis(250))
        .backoff_factor(3.0)
        .delay_ceiling(Duration::from_secs(1))
        .reraise_on([ErrorKind::PermissionDenied, ErrorKind::InvalidInput])
        .suppress_on([ErrorKind::Throttled])
        .build()?;
    assert_eq!(policy, expected);

    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::with_sleeper(policy, sleeper.clone());
    assert_eq!(executor.retry(|| None::<u8>), None);
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(250), Duration::from_millis(750), Duration::from_secs(1)]
    );
    Ok(())
}

/// Verifies the `[timeout]` table converts into a guard.
#[cfg(feature = "runtime")]
#[test]
fn test_document_to_guard() -> Result<()> {
    let settings = ResilienceSettings::from_toml_str(DOCUMENT)?;
    let timeout = settings.timeout.ok_or_else(|| anyhow::anyhow!("missing [timeout] table"))?;
    let guard = timeout.to_guard()?;

    assert_eq!(guard.deadline(), Duration::from_millis(1500));
    assert!(!guard.force_kill());
    assert_eq!(guard.termination_grace(), Duration::from_millis(100));
    Ok(())
}

/// Verifies an empty document yields default settings.
#[test]
fn test_empty_document_uses_defaults() -> Result<()> {
    let settings = ResilienceSettings::from_toml_str("")?;

    assert_eq!(settings.retry, RetrySettings::default());
    assert!(settings.timeout.is_none());
    assert_eq!(settings.retry.to_policy()?, RetryPolicy::default());
    Ok(())
}

/// Verifies settings files report the same field errors as the builder.
///
/// # Test Steps
/// 1. Load documents with each invalid value
/// 2. Verify conversion fails on the right field
#[test]
fn test_invalid_documents_rejected() -> Result<()> {
    let cases = [
        ("max_attempts = 0", "max_attempts"),
        ("initial_delay_secs = 0.0", "initial_delay"),
        ("backoff_factor = 1.0", "backoff_factor"),
        ("delay_ceiling_secs = -1.0", "delay_ceiling"),
    ];

    for (source, field) in cases {
        let settings = RetrySettings::from_toml_str(source)?;
        let err = settings.to_policy().expect_err(source);
        assert_eq!(err.field(), Some(field), "{source}");
    }
    Ok(())
}

/// Verifies malformed TOML is reported as a parse error.
#[test]
fn test_malformed_toml() {
    let err = ResilienceSettings::from_toml_str("[retry\nmax_attempts = 3").expect_err("bad TOML");
    assert!(matches!(err, ConfigurationError::Parse { .. }));
}

/// Verifies settings survive a render and reload.
#[test]
fn test_render_and_reload() -> Result<()> {
    let settings = ResilienceSettings::from_toml_str(DOCUMENT)?;
    let rendered = settings.to_toml_string()?;
    let reloaded = ResilienceSettings::from_toml_str(&rendered)?;

    assert_eq!(reloaded, settings);
    Ok(())
}
