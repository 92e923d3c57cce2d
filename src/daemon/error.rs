//! Error types for daemon supervision.

use thiserror::Error;

/// Errors that can occur while configuring or running the daemon.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// A daemon is already running on this controller.
    #[error("Tor daemon is already running")]
    AlreadyRunning,

    /// The daemon could not be launched.
    #[error("Failed to launch Tor daemon: {0}")]
    Launch(String),

    /// The daemon exited with an error.
    #[error("Tor daemon exited abnormally: {0}")]
    Exited(String),

    /// The transport helper could not be started.
    #[error("Failed to start transport helper: {0}")]
    Helper(String),
}

/// Result type for daemon supervision.
pub type ProcessResult<T> = Result<T, ProcessError>;
