//! Error types shared by the resilience primitives
//!
//! This module provides the error vocabulary every primitive in the crate
//! speaks:
//!
//! 1. **`ConfigurationError`**: invalid construction parameters. Raised by
//!    builders and settings conversions, never at call time, and never
//!    retried or suppressed.
//!
//! 2. **`ErrorKind`**: a closed set of failure categories. Retry policies
//!    hold sets of kinds (`reraise_on`, `suppress_on`) and the executor
//!    decides what to do with an error by looking up its kind.
//!
//! 3. **`ErrorClassification` trait**: maps an operation's error onto an
//!    `ErrorKind`. Any error type fed to the classification-aware retry
//!    executor must implement it.
//!
//! ## Classifying a module-specific error
//!
//! ```rust
//! use ec2utils_common::error::{ErrorClassification, ErrorKind};
//!
//! #[derive(Debug)]
//! enum InstanceError {
//!     AuthFailure,
//!     RequestLimitExceeded,
//!     Unknown(String),
//! }
//!
//! impl ErrorClassification for InstanceError {
//!     fn kind(&self) -> ErrorKind {
//!         match self {
//!             Self::AuthFailure => ErrorKind::PermissionDenied,
//!             Self::RequestLimitExceeded => ErrorKind::Throttled,
//!             Self::Unknown(_) => ErrorKind::Other,
//!         }
//!     }
//! }
//!
//! assert!(InstanceError::RequestLimitExceeded.is_transient());
//! assert!(!InstanceError::AuthFailure.is_transient());
//! ```

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard result type for fallible construction
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Invalid parameters supplied when building a primitive
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// A numeric parameter is outside its allowed range
    #[error("invalid value for '{field}': {message}")]
    OutOfRange { field: &'static str, message: String },

    /// Settings could not be parsed
    #[error("failed to parse {format} settings: {message}")]
    Parse { format: &'static str, message: String },
}

impl ConfigurationError {
    /// Create an out-of-range error for `field`
    pub fn out_of_range<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self::OutOfRange { field, message: message.into() }
    }

    /// Name of the offending field, if the error concerns a single field
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::OutOfRange { field, .. } => Some(field),
            Self::Parse { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigurationError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse { format: "TOML", message: err.to_string() }
    }
}

/// Failure categories used to classify operation errors
///
/// The set is deliberately small and closed so that retry policies can be
/// expressed as plain sets of kinds and loaded from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller lacks the rights to perform the operation
    PermissionDenied,
    /// The target resource does not exist
    NotFound,
    /// The remote side asked the caller to slow down
    Throttled,
    /// The operation did not finish in time
    Timeout,
    /// The remote side or a connection is temporarily unavailable
    Unavailable,
    /// The request itself is malformed
    InvalidInput,
    /// The resource is in a conflicting state
    Conflict,
    /// Invariant violation or bug
    Internal,
    /// Anything not covered above
    Other,
}

impl ErrorKind {
    /// Whether failures of this kind usually go away on their own
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Throttled | Self::Timeout | Self::Unavailable | Self::Conflict)
    }

    /// Stable snake_case name, matching the serde representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::InvalidInput => "invalid_input",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an error value onto an [`ErrorKind`]
pub trait ErrorClassification {
    /// The category this error belongs to
    fn kind(&self) -> ErrorKind;

    /// Shortcut for `self.kind().is_transient()`
    fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

impl ErrorClassification for ErrorKind {
    fn kind(&self) -> ErrorKind {
        *self
    }
}

impl ErrorClassification for ConfigurationError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

impl ErrorClassification for io::Error {
    fn kind(&self) -> ErrorKind {
        match io::Error::kind(self) {
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::Interrupted => ErrorKind::Unavailable,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidInput,
            io::ErrorKind::AlreadyExists | io::ErrorKind::AddrInUse => ErrorKind::Conflict,
            _ => ErrorKind::Other,
        }
    }
}

impl<E: ErrorClassification + ?Sized> ErrorClassification for Box<E> {
    fn kind(&self) -> ErrorKind {
        (**self).kind()
    }
}
