//! Integration tests for resilience module
//!
//! Exercises the three retry variants against scripted operations, the
//! classification table end to end, and the timeout and process guards.

#![cfg(feature = "runtime")]

use std::cell::Cell;
use std::io;
use std::time::{Duration, Instant};

use ec2utils_common::error::{ErrorClassification, ErrorKind};
use ec2utils_common::resilience::{
    timeout, GuardError, RecordingSleeper, RetryExecutor, RetryPolicy, TimeoutGuard,
};

/// Error used by scripted operations
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiError {
    kind: ErrorKind,
    code: &'static str,
}

impl ApiError {
    fn new(kind: ErrorKind, code: &'static str) -> Self {
        Self { kind, code }
    }
}

impl ErrorClassification for ApiError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Route executor logs to the test harness; `RUST_LOG=debug` shows attempts.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(100))
        .backoff_factor(2.0)
        .build()
        .expect("valid retry policy")
}

/// Verifies a truthy first result is returned without any sleep.
///
/// # Test Steps
/// 1. Run `retry` with an operation returning a non-empty string
/// 2. Verify the value comes back and no delay was requested
#[test]
fn test_truthy_first_attempt_never_sleeps() {
    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::with_sleeper(policy(5), sleeper.clone());
    let calls = Cell::new(0);

    let result = executor.retry(|| {
        calls.set(calls.get() + 1);
        String::from("running")
    });

    assert_eq!(result.as_deref(), Some("running"));
    assert_eq!(calls.get(), 1);
    assert_eq!(sleeper.count(), 0);
}

/// Verifies an always-falsy operation runs exactly `max_attempts` times and
/// the delays form the geometric series.
///
/// # Test Steps
/// 1. Run `retry` with `max_attempts = 4` on an operation returning `0`
/// 2. Verify 4 invocations, `None` as result
/// 3. Verify delays 100ms, 200ms, 400ms (none after the final attempt)
#[test]
fn test_falsy_operation_exhausts_attempts() {
    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::with_sleeper(policy(4), sleeper.clone());
    let calls = Cell::new(0u32);

    let result = executor.retry(|| {
        calls.set(calls.get() + 1);
        0u32
    });

    assert_eq!(result, None);
    assert_eq!(calls.get(), 4);
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
    );
    assert_eq!(sleeper.total(), Duration::from_millis(700));
}

/// Verifies the delay ceiling clamps every term of the schedule.
#[test]
fn test_delay_ceiling_clamps_schedule() {
    let policy = RetryPolicy::builder()
        .max_attempts(5)
        .initial_delay(Duration::from_millis(100))
        .backoff_factor(3.0)
        .delay_ceiling(Duration::from_millis(500))
        .build()
        .expect("valid retry policy");
    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::with_sleeper(policy.clone(), sleeper.clone());

    let result = executor.retry(|| false);

    assert_eq!(result, None);
    assert_eq!(sleeper.delays(), policy.delay_schedule());
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(300),
            Duration::from_millis(500),
            Duration::from_millis(500),
        ]
    );
}

/// Verifies the io-aware variant accepts falsy-but-present results and
/// re-raises the final attempt's error.
///
/// # Test Steps
/// 1. Fail twice with an I/O error, then return an empty list
/// 2. Verify the empty list is returned after three attempts
/// 3. With an always-failing operation, verify the last error comes back
#[test]
fn test_io_aware_variant() {
    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::with_sleeper(policy(3), sleeper.clone());
    let calls = Cell::new(0);

    let result = executor.retry_io_aware(|| {
        calls.set(calls.get() + 1);
        if calls.get() < 3 {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        } else {
            Ok(Some(Vec::<String>::new()))
        }
    });

    assert_eq!(result.expect("third attempt succeeds"), Some(Vec::new()));
    assert_eq!(sleeper.count(), 2);

    let attempt = Cell::new(0);
    let err = executor
        .retry_io_aware(|| -> io::Result<Option<()>> {
            attempt.set(attempt.get() + 1);
            Err(io::Error::new(io::ErrorKind::TimedOut, format!("attempt {}", attempt.get())))
        })
        .expect_err("every attempt fails");
    assert_eq!(err.to_string(), "attempt 3");
}

/// Verifies `reraise_on = {PermissionDenied}` propagates on the very first
/// attempt.
///
/// # Test Steps
/// 1. Build a policy with five attempts and `PermissionDenied` reraised
/// 2. Run an operation that always fails with `PermissionDenied`
/// 3. Verify exactly one invocation and the original error returned
#[test]
fn test_permission_denied_is_reraised_immediately() {
    init_tracing();
    let policy = RetryPolicy::builder()
        .max_attempts(5)
        .initial_delay(Duration::from_millis(100))
        .reraise_on([ErrorKind::PermissionDenied])
        .build()
        .expect("valid retry policy");
    let executor = RetryExecutor::with_sleeper(policy, RecordingSleeper::new());
    let calls = Cell::new(0);

    let result = executor.retry_with_classification(|| -> Result<Option<()>, ApiError> {
        calls.set(calls.get() + 1);
        Err(ApiError::new(ErrorKind::PermissionDenied, "UnauthorizedOperation"))
    });

    assert_eq!(
        result.expect_err("reraised"),
        ApiError::new(ErrorKind::PermissionDenied, "UnauthorizedOperation")
    );
    assert_eq!(calls.get(), 1);
}

/// Verifies suppression without reraise tolerates only the suppressed kinds,
/// even on the last attempt.
///
/// # Test Steps
/// 1. Suppress `Throttled` only
/// 2. Throttle twice, then fail with `NotFound` on the final attempt
/// 3. Verify `NotFound` propagates as unsuppressed, not as exhausted
#[test]
fn test_unsuppressed_kind_propagates_before_exhaustion() {
    init_tracing();
    let policy = RetryPolicy::builder()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(10))
        .suppress_on([ErrorKind::Throttled])
        .build()
        .expect("valid retry policy");
    let executor = RetryExecutor::with_sleeper(policy.clone(), RecordingSleeper::new());
    let calls = Cell::new(0);

    let result = executor.retry_with_classification(|| -> Result<Option<()>, ApiError> {
        calls.set(calls.get() + 1);
        if calls.get() < 3 {
            Err(ApiError::new(ErrorKind::Throttled, "RequestLimitExceeded"))
        } else {
            Err(ApiError::new(ErrorKind::NotFound, "InvalidInstanceID.NotFound"))
        }
    });

    assert_eq!(result.expect_err("propagated").code, "InvalidInstanceID.NotFound");
    assert_eq!(calls.get(), 3);
    assert_eq!(
        policy.classify(ErrorKind::NotFound, true),
        ec2utils_common::resilience::Classification::Unsuppressed
    );
}

/// Verifies suppressed errors are swallowed through exhaustion and the
/// classification variant sleeps at every attempt boundary.
#[test]
fn test_suppressed_errors_exhaust_to_none() {
    let policy = RetryPolicy::builder()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(100))
        .reraise_on([ErrorKind::PermissionDenied])
        .suppress_on([ErrorKind::Throttled])
        .build()
        .expect("valid retry policy");
    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::with_sleeper(policy, sleeper.clone());

    let result = executor.retry_with_classification(|| -> Result<Option<u8>, ApiError> {
        Err(ApiError::new(ErrorKind::Throttled, "RequestLimitExceeded"))
    });

    assert_eq!(result, Ok(None));
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
    );
}

/// Verifies a falsy but present value is accepted by the classification
/// variant.
#[test]
fn test_classification_accepts_falsy_value() {
    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::with_sleeper(policy(3), sleeper.clone());

    let result = executor.retry_with_classification(|| Ok::<_, ApiError>(Some(0u32)));

    assert_eq!(result, Ok(Some(0)));
    assert_eq!(sleeper.count(), 1);
}

/// Verifies invalid policies fail before any invocation.
#[test]
fn test_invalid_policies_rejected() {
    assert_eq!(
        RetryPolicy::builder().backoff_factor(1.0).build().expect_err("factor").field(),
        Some("backoff_factor")
    );
    assert_eq!(
        RetryPolicy::builder().max_attempts(0).build().expect_err("attempts").field(),
        Some("max_attempts")
    );
    assert_eq!(
        RetryPolicy::builder().initial_delay(Duration::ZERO).build().expect_err("delay").field(),
        Some("initial_delay")
    );
    assert_eq!(
        RetryPolicy::builder().delay_ceiling_secs(-1.0).build().expect_err("ceiling").field(),
        Some("delay_ceiling")
    );
}

/// Verifies the timeout guard bounds a slow operation and passes fast ones
/// through.
///
/// # Test Steps
/// 1. Run a 1s operation under a 0.5s deadline
/// 2. Verify `TimedOut` within 0.6s
/// 3. Run a 10ms operation under the same guard and verify its value
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_guard_deadline() {
    let guard = timeout(Duration::from_millis(500)).expect("valid deadline");

    let start = Instant::now();
    let slow = guard
        .run(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, ApiError>("late")
        })
        .await;
    assert!(matches!(slow, Err(GuardError::TimedOut { .. })));
    assert!(start.elapsed() < Duration::from_millis(600));

    let fast = guard
        .run(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, ApiError>("on time")
        })
        .await;
    assert_eq!(fast.expect("completes"), "on time");
}

/// Verifies guard errors feed back into retry classification.
///
/// # Test Steps
/// 1. Wrap a guarded call that times out twice, then succeeds
/// 2. Retry it with the classification variant on a blocking runtime
/// 3. Verify the third attempt's value is returned
#[test]
fn test_retry_around_timeout_guard() {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime builds");
    let guard = TimeoutGuard::builder()
        .deadline(Duration::from_millis(50))
        .build()
        .expect("valid guard");
    let policy = RetryPolicy::builder()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(1))
        .suppress_on([ErrorKind::Timeout])
        .build()
        .expect("valid retry policy");
    let executor = RetryExecutor::with_sleeper(policy, RecordingSleeper::new());
    let calls = Cell::new(0u64);

    let result = executor.retry_with_classification(|| {
        calls.set(calls.get() + 1);
        let work = if calls.get() < 3 { 200 } else { 1 };
        runtime
            .block_on(guard.run(async move {
                tokio::time::sleep(Duration::from_millis(work)).await;
                Ok::<_, ApiError>(work)
            }))
            .map(Some)
    });

    assert_eq!(result.expect("third attempt succeeds"), Some(1));
    assert_eq!(calls.get(), 3);
}
