//! Deadline enforcement for child processes
//!
//! Unlike a Tokio task, a child process can always be stopped: on expiry the
//! guard kills it and reaps the exit status so no zombie is left behind.

use std::io::{self, Read};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, trace, warn};
use wait_timeout::ChildExt;

use super::timeout::{GuardError, TimeoutGuard};
use crate::error::{ConfigResult, ConfigurationError};

/// Runs a command with a wall-clock deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGuard {
    deadline: Duration,
    force_kill: bool,
}

impl ProcessGuard {
    /// Guard that kills the child once `deadline` has passed
    pub fn new(deadline: Duration) -> ConfigResult<Self> {
        if deadline.is_zero() {
            return Err(ConfigurationError::out_of_range("deadline", "must be greater than zero"));
        }
        Ok(Self { deadline, force_kill: true })
    }

    /// Leave the child running on expiry instead of killing it
    pub fn with_force_kill(mut self, force_kill: bool) -> Self {
        self.force_kill = force_kill;
        self
    }

    /// Maximum time the child may run
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whether the child is killed on expiry
    pub fn force_kill(&self) -> bool {
        self.force_kill
    }

    /// Spawn `command` and wait for it up to the deadline
    ///
    /// Stdout and stderr are drained on reader threads while waiting, so
    /// output of any size is captured. A non-zero exit status is returned as
    /// a normal [`Output`]; only spawn and I/O failures become
    /// [`GuardError::Operation`].
    ///
    /// # Errors
    ///
    /// - [`GuardError::TimedOut`] if the deadline passed (the child has been
    ///   killed and reaped when `force_kill` is set)
    /// - [`GuardError::TerminationFailed`] if the child could not be killed
    /// - [`GuardError::Operation`] for spawn or I/O failures
    #[instrument(skip(self, command), fields(program = ?command.get_program(), deadline_ms = self.deadline.as_millis() as u64))]
    pub fn run(&self, command: &mut Command) -> Result<Output, GuardError<io::Error>> {
        let start = Instant::now();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(GuardError::Operation)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let waited = match child.wait_timeout(self.deadline) {
            Ok(waited) => waited,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GuardError::Operation(err));
            }
        };

        // Readers of an abandoned child are detached; a surviving grandchild
        // may hold the pipes open indefinitely.
        match waited {
            Some(status) => {
                trace!(exit_code = status.code(), "child exited");
                let output = Output {
                    status,
                    stdout: collect(stdout).map_err(GuardError::Operation)?,
                    stderr: collect(stderr).map_err(GuardError::Operation)?,
                };
                debug!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    success = output.status.success(),
                    "child finished within deadline"
                );
                Ok(output)
            }
            None if !self.force_kill => {
                warn!(pid = child.id(), "deadline exceeded, leaving child running");
                Err(GuardError::TimedOut { elapsed: start.elapsed() })
            }
            None => {
                warn!(pid = child.id(), "deadline exceeded, killing child");
                if let Err(err) = child.kill() {
                    let elapsed = start.elapsed();
                    error!(pid = child.id(), error = %err, "failed to kill child");
                    return Err(GuardError::TerminationFailed { elapsed });
                }
                // Reap so the exit status is collected
                if let Err(err) = child.wait() {
                    warn!(error = %err, "failed to reap killed child");
                }
                Err(GuardError::TimedOut { elapsed: start.elapsed() })
            }
        }
    }
}

type Reader = Option<JoinHandle<io::Result<Vec<u8>>>>;

fn drain<R>(pipe: Option<R>) -> Reader
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn collect(reader: Reader) -> io::Result<Vec<u8>> {
    match reader {
        Some(handle) => {
            handle.join().map_err(|_| io::Error::other("output reader panicked"))?
        }
        None => Ok(Vec::new()),
    }
}

impl From<TimeoutGuard> for ProcessGuard {
    fn from(guard: TimeoutGuard) -> Self {
        Self { deadline: guard.deadline(), force_kill: guard.force_kill() }
    }
}
