//! Error types for the control channel.

use thiserror::Error;

/// Errors that can occur on the control channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The channel has no open connection.
    #[error("Control channel is not connected")]
    NotConnected,

    /// The command needs an authenticated channel.
    #[error("Control channel is not authenticated")]
    NotAuthenticated,

    /// Opening the connection failed.
    #[error("Failed to connect to control port {address}: {reason}")]
    Connect {
        /// The control port address.
        address: String,
        /// The transport error.
        reason: String,
    },

    /// Reading from or writing to the connection failed.
    #[error("Control channel I/O error: {0}")]
    Io(String),

    /// The daemon closed the connection.
    #[error("Control connection closed by the daemon")]
    Closed,

    /// The daemon sent something that is not a valid reply.
    #[error("Malformed control reply: {0}")]
    Protocol(String),

    /// The daemon answered with an error status.
    #[error("Command rejected with {code}: {message}")]
    Rejected {
        /// The three-digit status code.
        code: u16,
        /// The daemon's explanation.
        message: String,
    },
}

/// Result type for control channel operations.
pub type ControlResult<T> = Result<T, ControlError>;
