//! Timeout guard running operations in an isolated worker
//!
//! [`TimeoutGuard`] spawns the operation as its own Tokio task and waits for
//! its result up to a deadline. When the deadline passes the worker is
//! aborted (or detached, with `force_kill(false)`) and the caller gets
//! [`GuardError::TimedOut`]. Any result that arrives later is dropped.
//!
//! Abort only takes effect at an `.await` point. A worker stuck in blocking
//! code never observes it, so the guard waits `termination_grace` for the
//! abort to be confirmed and reports [`GuardError::TerminationFailed`] when
//! it is not. Synchronous operations belong in
//! [`TimeoutGuard::run_blocking`], which keeps them on Tokio's blocking pool
//! so they cannot starve the waiting caller. Use
//! [`ProcessGuard`](super::ProcessGuard) when the work must be killable
//! unconditionally.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use ec2utils_common::resilience::{timeout, GuardError};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let guard = timeout(Duration::from_millis(50)).expect("non-zero deadline");
//!
//! let result = guard
//!     .run(async {
//!         tokio::time::sleep(Duration::from_secs(5)).await;
//!         Ok::<_, std::io::Error>("done")
//!     })
//!     .await;
//!
//! assert!(matches!(result, Err(GuardError::TimedOut { .. })));
//! # }
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::error::{ConfigResult, ConfigurationError, ErrorClassification, ErrorKind};

/// How long an aborted worker gets to confirm it stopped
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_millis(100);

/// Failure of a guarded operation
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The operation ran to completion and returned its own error
    #[error("operation failed: {0}")]
    Operation(E),

    /// The deadline elapsed before the operation produced a result
    #[error("operation timed out after {elapsed:?}")]
    TimedOut { elapsed: Duration },

    /// The deadline elapsed and the worker could not be stopped
    #[error("operation timed out after {elapsed:?} and its worker could not be terminated")]
    TerminationFailed { elapsed: Duration },

    /// The worker was cancelled externally before it produced a result
    #[error("worker was cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration },
}

impl<E> GuardError<E> {
    /// Time spent waiting, for every variant except `Operation`
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::Operation(_) => None,
            Self::TimedOut { elapsed }
            | Self::TerminationFailed { elapsed }
            | Self::Cancelled { elapsed } => Some(*elapsed),
        }
    }

    /// Whether the deadline was exceeded
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::TerminationFailed { .. })
    }

    /// The operation's own error, if that is what this is
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}

impl<E: ErrorClassification> ErrorClassification for GuardError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Operation(err) => err.kind(),
            Self::TimedOut { .. } => ErrorKind::Timeout,
            Self::TerminationFailed { .. } => ErrorKind::Internal,
            Self::Cancelled { .. } => ErrorKind::Unavailable,
        }
    }
}

/// Bounds the wall-clock time of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    deadline: Duration,
    force_kill: bool,
    termination_grace: Duration,
}

impl TimeoutGuard {
    /// Create a builder
    pub fn builder() -> TimeoutGuardBuilder {
        TimeoutGuardBuilder::new()
    }

    /// Guard with `deadline` and default settings
    pub fn new(deadline: Duration) -> ConfigResult<Self> {
        Self::builder().deadline(deadline).build()
    }

    /// Maximum time to wait for a result
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whether the worker is aborted on expiry rather than detached
    pub fn force_kill(&self) -> bool {
        self.force_kill
    }

    /// How long an aborted worker gets to confirm it stopped
    pub fn termination_grace(&self) -> Duration {
        self.termination_grace
    }

    /// Run `operation` in a fresh worker task, waiting at most `deadline`
    ///
    /// A result that only becomes available after the deadline is dropped
    /// and reported as [`GuardError::TimedOut`].
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, and re-raises any panic
    /// raised by the worker.
    #[instrument(skip(self, operation), fields(deadline_ms = self.deadline.as_millis() as u64))]
    pub async fn run<T, E, Fut>(&self, operation: Fut) -> Result<T, GuardError<E>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let start = Instant::now();
        let (tx, rx) = oneshot::channel();

        let handle: JoinHandle<()> = tokio::spawn(async move {
            let result = operation.await;
            // Receiver is gone once the caller gave up
            let _ = tx.send(result);
        });

        self.await_worker(handle, rx, start).await
    }

    /// Run a synchronous `operation` on Tokio's blocking pool, waiting at
    /// most `deadline`
    ///
    /// The caller is never starved by the operation. A running thread
    /// cannot be stopped, so with `force_kill` an operation still running
    /// after `termination_grace` is reported as
    /// [`GuardError::TerminationFailed`] and left to finish on its own; its
    /// result is dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, and re-raises any panic
    /// raised by the operation.
    #[instrument(skip(self, operation), fields(deadline_ms = self.deadline.as_millis() as u64))]
    pub async fn run_blocking<T, E, F>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let start = Instant::now();
        let (tx, rx) = oneshot::channel();

        let handle: JoinHandle<()> = tokio::task::spawn_blocking(move || {
            let _ = tx.send(operation());
        });

        self.await_worker(handle, rx, start).await
    }

    async fn await_worker<T, E>(
        &self,
        handle: JoinHandle<()>,
        mut rx: oneshot::Receiver<Result<T, E>>,
        start: Instant,
    ) -> Result<T, GuardError<E>> {
        match tokio::time::timeout(self.deadline, &mut rx).await {
            Ok(Ok(result)) => {
                let elapsed = start.elapsed();
                // A worker that blocked its own runtime thread can deliver
                // after the timer should have fired
                if elapsed > self.deadline {
                    warn!(elapsed_ms = elapsed.as_millis() as u64, "discarding late result");
                    return Err(GuardError::TimedOut { elapsed });
                }
                result.map_err(|err| {
                    debug!(elapsed_ms = elapsed.as_millis() as u64, "guarded operation failed");
                    GuardError::Operation(err)
                })
            }
            // Sender dropped without a result: the worker panicked or was cancelled
            Ok(Err(_)) => match handle.await {
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                _ => Err(GuardError::Cancelled { elapsed: start.elapsed() }),
            },
            Err(_) => {
                drop(rx);
                self.terminate(handle, start).await
            }
        }
    }

    async fn terminate<T, E>(
        &self,
        handle: JoinHandle<()>,
        start: Instant,
    ) -> Result<T, GuardError<E>> {
        if !self.force_kill {
            warn!(elapsed_ms = start.elapsed().as_millis() as u64, "deadline exceeded, detaching worker");
            return Err(GuardError::TimedOut { elapsed: start.elapsed() });
        }

        handle.abort();
        match tokio::time::timeout(self.termination_grace, handle).await {
            Ok(_) => {
                let elapsed = start.elapsed();
                warn!(elapsed_ms = elapsed.as_millis() as u64, "deadline exceeded, worker aborted");
                Err(GuardError::TimedOut { elapsed })
            }
            Err(_) => {
                let elapsed = start.elapsed();
                error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    grace_ms = self.termination_grace.as_millis() as u64,
                    "worker did not stop after abort"
                );
                Err(GuardError::TerminationFailed { elapsed })
            }
        }
    }
}

/// Builder for [`TimeoutGuard`]
#[derive(Debug, Clone)]
pub struct TimeoutGuardBuilder {
    deadline: Option<Duration>,
    force_kill: bool,
    termination_grace: Duration,
}

impl Default for TimeoutGuardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutGuardBuilder {
    /// Builder with no deadline, `force_kill` on and the default grace
    pub fn new() -> Self {
        Self { deadline: None, force_kill: true, termination_grace: DEFAULT_TERMINATION_GRACE }
    }

    /// Maximum time to wait for the operation (required, must be > 0)
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort the worker on expiry (default) or leave it running detached
    pub fn force_kill(mut self, force_kill: bool) -> Self {
        self.force_kill = force_kill;
        self
    }

    /// How long to wait for an aborted worker to stop
    pub fn termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    /// Validate the settings and create the guard
    pub fn build(self) -> ConfigResult<TimeoutGuard> {
        let deadline = match self.deadline {
            Some(deadline) if !deadline.is_zero() => deadline,
            Some(_) => {
                return Err(ConfigurationError::out_of_range("deadline", "must be greater than zero"))
            }
            None => return Err(ConfigurationError::out_of_range("deadline", "is required")),
        };

        Ok(TimeoutGuard {
            deadline,
            force_kill: self.force_kill,
            termination_grace: self.termination_grace,
        })
    }
}

/// Shorthand for `TimeoutGuard::new(deadline)`
pub fn timeout(deadline: Duration) -> ConfigResult<TimeoutGuard> {
    TimeoutGuard::new(deadline)
}
