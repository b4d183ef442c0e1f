//! Resilience primitives shared across ec2utils crates.
//!
//! - [`resilience`]: retry with exponential backoff, timeout and process
//!   guards
//! - [`cache`]: bounded LRU memoization of expensive calls
//! - [`config`]: TOML-loadable settings for the above
//! - [`error`]: configuration errors and the error classification used by
//!   retry policies
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, config, retry, memoization, serde helpers
//! - `runtime`: Tokio-backed timeout guard and child-process guard (default)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod cache;
#[cfg(feature = "foundation")]
pub mod config;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod resilience;
#[cfg(feature = "foundation")]
pub mod utils;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use cache::{lru_cache, try_lru_cache, CacheStats, MemoCache, Memoized, TryMemoized};
#[cfg(feature = "foundation")]
pub use config::{ResilienceSettings, RetrySettings, TimeoutSettings};
#[cfg(feature = "foundation")]
pub use error::{ConfigResult, ConfigurationError, ErrorClassification, ErrorKind};
#[cfg(feature = "runtime")]
pub use resilience::{timeout, GuardError, ProcessGuard, TimeoutGuard, TimeoutGuardBuilder};
#[cfg(feature = "foundation")]
pub use resilience::{
    retry, retry_io_aware, retry_with_classification, Classification, RecordingSleeper,
    RetryExecutor, RetryPolicy, RetryPolicyBuilder, Sleeper, ThreadSleeper, Truthy,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
