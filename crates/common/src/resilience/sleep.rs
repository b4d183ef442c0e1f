//! Sleeping abstraction for the retry executor
//!
//! Retrying suspends the calling thread between attempts. Routing that
//! suspension through [`Sleeper`] lets tests swap in [`RecordingSleeper`] and
//! assert the exact backoff schedule without waiting for it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Suspends the current thread between retry attempts
pub trait Sleeper {
    /// Block for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by [`std::thread::sleep`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

impl<T: Sleeper + ?Sized> Sleeper for Arc<T> {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Sleeper that records requested delays instead of blocking
///
/// Clones share the same log, so a test can hand one clone to the executor
/// and inspect the other afterwards.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Number of sleeps requested
    pub fn count(&self) -> usize {
        self.delays.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Sum of all requested delays
    pub fn total(&self) -> Duration {
        self.delays.lock().map(|d| d.iter().sum()).unwrap_or(Duration::ZERO)
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for resilience::sleep.
    use std::time::Instant;

    use super::*;

    /// Validates `RecordingSleeper` shares its log across clones.
    ///
    /// Assertions:
    /// - Confirms `observer.delays()` equals the delays fed to the clone.
    /// - Confirms `observer.total()` equals their sum.
    #[test]
    fn test_recording_sleeper_shared_log() {
        let observer = RecordingSleeper::new();
        let sleeper = observer.clone();

        sleeper.sleep(Duration::from_millis(10));
        sleeper.sleep(Duration::from_millis(20));

        assert_eq!(observer.delays(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
        assert_eq!(observer.count(), 2);
        assert_eq!(observer.total(), Duration::from_millis(30));
    }

    /// Validates `ThreadSleeper` actually blocks.
    #[test]
    fn test_thread_sleeper_blocks() {
        let start = Instant::now();
        ThreadSleeper.sleep(Duration::from_millis(15));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
