//! Observable connection state.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::TorError;

/// Capacity of each broadcast stream. Slow subscribers that fall further
/// behind than this observe a lag error and skip ahead.
const STREAM_CAPACITY: usize = 64;

/// Lifecycle state of the Tor connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Nothing running.
    #[default]
    Disconnected,
    /// The daemon is launching and the control channel is not yet
    /// authenticated.
    Connecting,
    /// The control channel is authenticated; waiting for a circuit.
    PortsOpen,
    /// A circuit is established. Traffic may flow through the SOCKS port.
    Connected,
    /// Shutting down.
    Disconnecting,
}

impl ConnectionStatus {
    /// Returns true if wallet traffic may be sent.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true while an attempt is in flight or established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::PortsOpen | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::PortsOpen => "ports open",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

/// Holds the observable state and fans changes out to subscribers.
///
/// Current values are kept in `watch` channels so late readers always see
/// the latest status and progress. Every change is also published on a
/// `broadcast` stream so subscribers can observe each transition in order.
#[derive(Debug)]
pub struct StatusBoard {
    status: watch::Sender<ConnectionStatus>,
    progress: watch::Sender<u8>,
    status_events: broadcast::Sender<ConnectionStatus>,
    progress_events: broadcast::Sender<u8>,
    errors: broadcast::Sender<TorError>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    /// Creates a board at `Disconnected` with zero progress.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (progress, _) = watch::channel(0);
        let (status_events, _) = broadcast::channel(STREAM_CAPACITY);
        let (progress_events, _) = broadcast::channel(STREAM_CAPACITY);
        let (errors, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            status,
            progress,
            status_events,
            progress_events,
            errors,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Current bootstrap progress, 0 to 100.
    #[must_use]
    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    /// Moves to `status`. Publishes nothing if the status is unchanged.
    pub fn set_status(&self, status: ConnectionStatus) {
        let mut previous = status;
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            previous = std::mem::replace(current, status);
            true
        });
        if changed {
            info!(from = %previous, to = %status, "Tor connection status changed");
            let _ = self.status_events.send(status);
        }
    }

    /// Raises progress to `value` (clamped to 100). Lower or equal values
    /// are ignored. Returns true if the value was published.
    pub fn advance_progress(&self, value: u8) -> bool {
        let value = value.min(100);
        let advanced = self.progress.send_if_modified(|current| {
            if value <= *current {
                return false;
            }
            *current = value;
            true
        });
        if advanced {
            debug!(progress = value, "Tor bootstrap progress");
            let _ = self.progress_events.send(value);
        }
        advanced
    }

    /// Resets progress to zero for the next attempt.
    pub fn reset_progress(&self) {
        if self.progress.send_replace(0) != 0 {
            let _ = self.progress_events.send(0);
        }
    }

    /// Publishes an error on the error stream.
    pub fn report(&self, error: TorError) {
        warn!(error = %error, fatal = error.is_fatal(), "Tor error reported");
        let _ = self.errors.send(error);
    }

    /// Receiver that always holds the current status.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Stream of status transitions from now on.
    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_events.subscribe()
    }

    /// Stream of progress values from now on.
    #[must_use]
    pub fn subscribe_progress(&self) -> broadcast::Receiver<u8> {
        self.progress_events.subscribe()
    }

    /// Stream of reported errors from now on.
    #[must_use]
    pub fn subscribe_errors(&self) -> broadcast::Receiver<TorError> {
        self.errors.subscribe()
    }
}
