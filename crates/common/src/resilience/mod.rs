//! Resilience primitives for unreliable operations
//!
//! - **Retry**: re-run an operation with exponential backoff until it
//!   succeeds, with three flavours of failure handling (falsy results,
//!   I/O-style errors, and errors classified by [`ErrorKind`])
//! - **Timeout guard** (`runtime` feature): bound the wall-clock time of an
//!   operation running in an isolated Tokio task
//! - **Process guard** (`runtime` feature): the same for child processes,
//!   which can always be killed
//!
//! ## Retrying a flaky call
//!
//! ```rust
//! use std::time::Duration;
//!
//! use ec2utils_common::resilience::{RecordingSleeper, RetryExecutor, RetryPolicy};
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(4)
//!     .initial_delay(Duration::from_millis(100))
//!     .build()
//!     .expect("valid policy");
//!
//! let sleeper = RecordingSleeper::new();
//! let executor = RetryExecutor::with_sleeper(policy, sleeper.clone());
//!
//! let mut calls = 0;
//! let ready = executor.retry(|| {
//!     calls += 1;
//!     calls == 3
//! });
//!
//! assert_eq!(ready, Some(true));
//! assert_eq!(sleeper.delays(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
//! ```
//!
//! [`ErrorKind`]: crate::error::ErrorKind

pub mod retry;
pub mod sleep;

#[cfg(feature = "runtime")]
pub mod process;
#[cfg(feature = "runtime")]
pub mod timeout;

pub use retry::{
    retry, retry_io_aware, retry_with_classification, Backoff, Classification, RetryExecutor,
    RetryPolicy, RetryPolicyBuilder, Truthy, DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY,
    DEFAULT_MAX_ATTEMPTS,
};
pub use sleep::{RecordingSleeper, Sleeper, ThreadSleeper};

#[cfg(feature = "runtime")]
pub use process::ProcessGuard;
#[cfg(feature = "runtime")]
pub use timeout::{
    timeout, GuardError, TimeoutGuard, TimeoutGuardBuilder, DEFAULT_TERMINATION_GRACE,
};
