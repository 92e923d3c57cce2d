//! Crate-level error type.
//!
//! [`TorError`] is what the lifecycle controller returns from its operations
//! and what it broadcasts on the error stream. It is `Clone` so one error
//! can reach every subscriber.

use thiserror::Error;

use crate::control::ControlError;
use crate::daemon::ProcessError;
use crate::store::StoreError;

/// Errors surfaced by the Tor lifecycle controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TorError {
    /// The control channel could not be opened or authenticated.
    ///
    /// Fatal to the attempt; call `start` again to retry.
    #[error("Failed to connect to Tor: {0}")]
    ConnectionFailed(String),

    /// No circuit was established before the watchdog deadline.
    ///
    /// Not fatal: the attempt continues after a soft kick.
    #[error("Timed out waiting for a Tor circuit")]
    ConnectionTimeout,

    /// The authentication cookie is absent or unreadable.
    #[error("Tor authentication cookie unavailable: {0}")]
    MissingCookie(String),

    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Daemon supervision failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A control command failed after authentication.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Preferences could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TorError {
    /// Returns true if the error ends the current connection attempt.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::ConnectionTimeout)
    }
}

/// Result type for lifecycle operations.
pub type TorResult<T> = Result<T, TorError>;
