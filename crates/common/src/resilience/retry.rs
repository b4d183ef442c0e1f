//! Retry-with-backoff executor
//!
//! This module re-invokes an operation until it produces an acceptable
//! result, suspending the calling thread between attempts with exponentially
//! growing delays. Three variants cover the three ways an operation can
//! signal "not yet":
//!
//! - [`RetryExecutor::retry`]: the result itself is judged by [`Truthy`];
//!   falsy results are retried.
//! - [`RetryExecutor::retry_io_aware`]: the operation returns
//!   `Result<Option<T>, E>`. `Ok(None)` and errors are retried, while
//!   `Ok(Some(v))` is accepted even when `v` is empty or zero.
//! - [`RetryExecutor::retry_with_classification`]: like the io-aware variant,
//!   but every error is classified against the policy's `reraise_on` and
//!   `suppress_on` sets before deciding whether to keep going.
//!
//! Running out of attempts is not an error: all variants report it as
//! `None` / `Ok(None)` and callers must check for it explicitly.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use ec2utils_common::resilience::{RecordingSleeper, RetryExecutor, RetryPolicy};
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(4)
//!     .initial_delay(Duration::from_millis(100))
//!     .backoff_factor(2.0)
//!     .build()
//!     .expect("valid policy");
//!
//! let sleeper = RecordingSleeper::new();
//! let executor = RetryExecutor::with_sleeper(policy, sleeper.clone());
//!
//! let mut calls = 0;
//! let found = executor.retry(|| {
//!     calls += 1;
//!     calls == 3
//! });
//!
//! assert_eq!(found, Some(true));
//! assert_eq!(sleeper.delays(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::sleep::{Sleeper, ThreadSleeper};
use crate::error::{ConfigResult, ConfigurationError, ErrorClassification, ErrorKind};

/// Default number of attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the second attempt
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);
/// Default multiplier applied to the delay after every attempt
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

//==============================================================================
// Truthiness
//==============================================================================

/// Decides whether a result is acceptable to [`RetryExecutor::retry`]
///
/// Empty collections, zero numbers, `false`, `None` and `()` are falsy.
/// Operations whose legitimate answers may be empty should return
/// `Result<Option<T>, E>` and use the io-aware variant instead.
pub trait Truthy {
    /// `true` when the value should end the retry loop
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl Truthy for () {
    fn is_truthy(&self) -> bool {
        false
    }
}

impl<T> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.is_some()
    }
}

impl<T, E> Truthy for Result<T, E> {
    fn is_truthy(&self) -> bool {
        self.is_ok()
    }
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for &str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Truthy for Vec<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Truthy for VecDeque<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Truthy for &[T] {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<K, V, S> Truthy for HashMap<K, V, S> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T, S> Truthy for HashSet<T, S> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<K, V> Truthy for BTreeMap<K, V> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Truthy for BTreeSet<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Truthy + ?Sized> Truthy for Box<T> {
    fn is_truthy(&self) -> bool {
        (**self).is_truthy()
    }
}

macro_rules! impl_truthy_for_numbers {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Truthy for $ty {
                fn is_truthy(&self) -> bool {
                    *self != 0 as $ty
                }
            }
        )*
    };
}

impl_truthy_for_numbers!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

//==============================================================================
// Policy
//==============================================================================

/// Immutable retry configuration
///
/// Built through [`RetryPolicy::builder`] (or converted from
/// [`crate::config::RetrySettings`]); every invalid combination is rejected
/// there, so a `RetryPolicy` in hand is always usable.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    delay_ceiling: Duration,
    reraise_on: HashSet<ErrorKind>,
    suppress_on: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            delay_ceiling: Duration::ZERO,
            reraise_on: HashSet::new(),
            suppress_on: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy builder starting from the defaults
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Shorthand for a policy with `max_attempts` and default delays
    pub fn attempts(max_attempts: u32) -> ConfigResult<Self> {
        Self::builder().max_attempts(max_attempts).build()
    }

    /// Maximum number of invocations of the operation
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the second attempt
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Multiplier applied to the delay after each attempt
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Upper bound for any single delay; zero means unbounded
    pub fn delay_ceiling(&self) -> Duration {
        self.delay_ceiling
    }

    /// Kinds that abort retrying immediately
    pub fn reraise_on(&self) -> &HashSet<ErrorKind> {
        &self.reraise_on
    }

    /// Kinds that are swallowed until attempts run out
    pub fn suppress_on(&self) -> &HashSet<ErrorKind> {
        &self.suppress_on
    }

    /// Fresh delay sequence for one retry run
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_delay, self.backoff_factor, self.delay_ceiling)
    }

    /// Delays the truthiness variant sleeps between attempts when every
    /// attempt fails (`max_attempts - 1` entries)
    pub fn delay_schedule(&self) -> Vec<Duration> {
        let mut backoff = self.backoff();
        (1..self.max_attempts).map(|_| backoff.advance()).collect()
    }

    /// Apply the classification table to an error of `kind`
    ///
    /// `last_attempt` is `true` when no attempts remain after the one that
    /// produced the error.
    pub fn classify(&self, kind: ErrorKind, last_attempt: bool) -> Classification {
        if self.reraise_on.contains(&kind) {
            Classification::Reraise
        } else if self.suppress_on.contains(&kind) {
            Classification::Suppress
        } else if !self.suppress_on.is_empty() && self.reraise_on.is_empty() {
            // Suppression without explicit reraise tolerates only the
            // suppressed kinds.
            Classification::Unsuppressed
        } else if last_attempt {
            Classification::Exhausted
        } else {
            Classification::Retry
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts < 1 {
            return Err(ConfigurationError::out_of_range(
                "max_attempts",
                "must be 1 or greater",
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigurationError::out_of_range(
                "initial_delay",
                "must be greater than 0",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(ConfigurationError::out_of_range(
                "backoff_factor",
                format!("must be a finite number greater than 1, got {}", self.backoff_factor),
            ));
        }
        Ok(())
    }
}

/// Outcome of classifying one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Kind is in `reraise_on`: propagate now
    Reraise,
    /// Kind is in `suppress_on`: discard and continue
    Suppress,
    /// `suppress_on` is set, `reraise_on` is empty and the kind is not
    /// suppressed: propagate now
    Unsuppressed,
    /// Unlisted kind with attempts remaining: discard and retry
    Retry,
    /// Unlisted kind on the final attempt: propagate
    Exhausted,
}

impl Classification {
    /// Whether the error must be handed back to the caller
    pub const fn propagates(self) -> bool {
        matches!(self, Self::Reraise | Self::Unsuppressed | Self::Exhausted)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Reraise => "reraise",
            Self::Suppress => "suppress",
            Self::Unsuppressed => "unsuppressed",
            Self::Retry => "retry",
            Self::Exhausted => "exhausted",
        };
        f.write_str(label)
    }
}

/// Builder for [`RetryPolicy`] with fluent API
///
/// The `*_secs` setters accept raw floating point seconds (as found in
/// settings files); negative or non-finite values are reported by
/// [`build`](Self::build).
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
    pending_error: Option<ConfigurationError>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    /// Builder starting from [`RetryPolicy::default`]
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default(), pending_error: None }
    }

    /// Total invocations allowed, at least 1
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Delay before the second attempt, must be non-zero
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// [`initial_delay`](Self::initial_delay) in fractional seconds
    pub fn initial_delay_secs(mut self, secs: f64) -> Self {
        match secs_to_duration("initial_delay", secs) {
            Ok(delay) => self.policy.initial_delay = delay,
            Err(err) => self.record(err),
        }
        self
    }

    /// Delay multiplier after each attempt, must be greater than 1
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    /// Cap every delay at `ceiling`; `Duration::ZERO` removes the cap
    pub fn delay_ceiling(mut self, ceiling: Duration) -> Self {
        self.policy.delay_ceiling = ceiling;
        self
    }

    /// [`delay_ceiling`](Self::delay_ceiling) in fractional seconds
    pub fn delay_ceiling_secs(mut self, secs: f64) -> Self {
        match secs_to_duration("delay_ceiling", secs) {
            Ok(ceiling) => self.policy.delay_ceiling = ceiling,
            Err(err) => self.record(err),
        }
        self
    }

    /// Add kinds that stop retrying and propagate immediately
    pub fn reraise_on<I: IntoIterator<Item = ErrorKind>>(mut self, kinds: I) -> Self {
        self.policy.reraise_on.extend(kinds);
        self
    }

    /// Add kinds that are swallowed while attempts remain
    pub fn suppress_on<I: IntoIterator<Item = ErrorKind>>(mut self, kinds: I) -> Self {
        self.policy.suppress_on.extend(kinds);
        self
    }

    /// Validate the settings and create the policy
    pub fn build(self) -> ConfigResult<RetryPolicy> {
        if let Some(err) = self.pending_error {
            return Err(err);
        }
        self.policy.validate()?;
        Ok(self.policy)
    }

    fn record(&mut self, err: ConfigurationError) {
        self.pending_error.get_or_insert(err);
    }
}

fn secs_to_duration(field: &'static str, secs: f64) -> ConfigResult<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return Err(ConfigurationError::out_of_range(
            field,
            format!("must be a non-negative number of seconds, got {secs}"),
        ));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|err| ConfigurationError::out_of_range(field, err.to_string()))
}

//==============================================================================
// Backoff
//==============================================================================

/// Exponentially growing delay sequence, clamped to an optional ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    ceiling: Duration,
}

impl Backoff {
    /// Sequence starting at `initial`; a zero `ceiling` means unbounded
    pub fn new(initial: Duration, factor: f64, ceiling: Duration) -> Self {
        let mut backoff = Self { current: initial, factor, ceiling };
        backoff.current = backoff.clamp(initial);
        backoff
    }

    /// Delay that the next call to [`advance`](Self::advance) returns
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the current delay and grow the next one by the factor
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.clamp(scale(delay, self.factor));
        delay
    }

    fn clamp(&self, delay: Duration) -> Duration {
        if !self.ceiling.is_zero() && delay > self.ceiling {
            self.ceiling
        } else {
            delay
        }
    }
}

fn scale(delay: Duration, factor: f64) -> Duration {
    let nanos = (delay.as_nanos() as f64 * factor).round();
    if nanos >= u64::MAX as f64 {
        Duration::from_nanos(u64::MAX)
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

/// Sleeps and grows the backoff when an attempt scope ends, on every exit
/// path of that attempt
struct AttemptBoundary<'a, S: Sleeper> {
    backoff: &'a mut Backoff,
    sleeper: &'a S,
}

impl<S: Sleeper> Drop for AttemptBoundary<'_, S> {
    fn drop(&mut self) {
        let delay = self.backoff.advance();
        self.sleeper.sleep(delay);
    }
}

//==============================================================================
// Executor
//==============================================================================

/// Runs operations under a [`RetryPolicy`]
///
/// The executor is synchronous: attempts run on the calling thread and the
/// thread is suspended between them.
#[derive(Debug, Clone)]
pub struct RetryExecutor<S = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl RetryExecutor<ThreadSleeper> {
    /// Create an executor that really sleeps between attempts
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, sleeper: ThreadSleeper }
    }
}

impl<S: Sleeper> RetryExecutor<S> {
    /// Create an executor with a custom [`Sleeper`]
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// The policy this executor applies
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry until the operation returns a truthy value
    ///
    /// Returns `None` when every attempt was falsy. No delay follows the
    /// final attempt.
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.max_attempts))]
    pub fn retry<T, F>(&self, mut operation: F) -> Option<T>
    where
        T: Truthy,
        F: FnMut() -> T,
    {
        let max_attempts = self.policy.max_attempts;
        let mut backoff = self.policy.backoff();

        for attempt in 1..=max_attempts {
            debug!("Executing operation (attempt {}/{})", attempt, max_attempts);
            let value = operation();
            if value.is_truthy() {
                if attempt > 1 {
                    debug!("Operation succeeded after {} retries", attempt - 1);
                }
                return Some(value);
            }
            if attempt < max_attempts {
                let delay = backoff.advance();
                debug!("Falsy result (attempt {}), retrying after {:?}", attempt, delay);
                self.sleeper.sleep(delay);
            }
        }

        warn!("No truthy result after {} attempts", max_attempts);
        None
    }

    /// Retry until the operation yields `Ok(Some(_))`
    ///
    /// `Ok(None)` and errors are both transient. If the final attempt fails
    /// with an error, that error is returned unchanged; if it yields
    /// `Ok(None)`, so does this call.
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.max_attempts))]
    pub fn retry_io_aware<T, E, F>(&self, mut operation: F) -> Result<Option<T>, E>
    where
        E: fmt::Debug,
        F: FnMut() -> Result<Option<T>, E>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut backoff = self.policy.backoff();

        for attempt in 1..=max_attempts {
            debug!("Executing operation (attempt {}/{})", attempt, max_attempts);
            match operation() {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => debug!("No result on attempt {}", attempt),
                Err(error) if attempt == max_attempts => {
                    warn!(
                        "All retry attempts exhausted after {} tries, last error: {:?}",
                        attempt, error
                    );
                    return Err(error);
                }
                Err(error) => debug!("Attempt {} failed: {:?}", attempt, error),
            }
            if attempt < max_attempts {
                let delay = backoff.advance();
                debug!("Retrying after {:?}", delay);
                self.sleeper.sleep(delay);
            }
        }

        warn!("No result after {} attempts", max_attempts);
        Ok(None)
    }

    /// Retry with per-error classification against `reraise_on` and
    /// `suppress_on`
    ///
    /// `Ok(Some(v))` is accepted immediately, however falsy `v` is. Errors
    /// are resolved with [`RetryPolicy::classify`]; propagated errors are
    /// returned unchanged. The backoff delay is slept once at the end of
    /// every attempt, whichever way the attempt exits.
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.max_attempts))]
    pub fn retry_with_classification<T, E, F>(&self, mut operation: F) -> Result<Option<T>, E>
    where
        E: ErrorClassification + fmt::Debug,
        F: FnMut() -> Result<Option<T>, E>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut backoff = self.policy.backoff();

        for attempt in 1..=max_attempts {
            let _boundary = AttemptBoundary { backoff: &mut backoff, sleeper: &self.sleeper };
            debug!("Executing operation (attempt {}/{})", attempt, max_attempts);

            let error = match operation() {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => continue,
                Err(error) => error,
            };

            let kind = error.kind();
            let verdict = self.policy.classify(kind, attempt == max_attempts);
            if verdict.propagates() {
                warn!(%kind, %verdict, attempt, "Propagating operation error: {:?}", error);
                return Err(error);
            }
            debug!(%kind, %verdict, attempt, "Discarding operation error: {:?}", error);
        }

        warn!("No result after {} attempts", max_attempts);
        Ok(None)
    }
}

/// Run `operation` under `policy` with the truthiness variant
pub fn retry<T, F>(policy: &RetryPolicy, operation: F) -> Option<T>
where
    T: Truthy,
    F: FnMut() -> T,
{
    RetryExecutor::new(policy.clone()).retry(operation)
}

/// Run `operation` under `policy` with the io-aware variant
pub fn retry_io_aware<T, E, F>(policy: &RetryPolicy, operation: F) -> Result<Option<T>, E>
where
    E: fmt::Debug,
    F: FnMut() -> Result<Option<T>, E>,
{
    RetryExecutor::new(policy.clone()).retry_io_aware(operation)
}

/// Run `operation` under `policy` with the classification-aware variant
pub fn retry_with_classification<T, E, F>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<Option<T>, E>
where
    E: ErrorClassification + fmt::Debug,
    F: FnMut() -> Result<Option<T>, E>,
{
    RetryExecutor::new(policy.clone()).retry_with_classification(operation)
}
