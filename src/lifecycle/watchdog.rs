//! Connection attempt watchdog.
//!
//! Toggling `DisableNetwork` makes the daemon abandon pending connections
//! and retry immediately. The process and its control channel stay up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::status::StatusBoard;
use crate::control::ControlChannel;
use crate::error::{TorError, TorResult};

/// Nudges the daemon into retrying its network without a restart.
pub trait SoftKick: Send + Sync {
    /// Disables and re-enables the daemon's network.
    ///
    /// # Errors
    ///
    /// Returns an error if either command fails.
    fn kick(&self) -> BoxFuture<'_, TorResult<()>>;
}

impl SoftKick for ControlChannel {
    fn kick(&self) -> BoxFuture<'_, TorResult<()>> {
        Box::pin(async move {
            self.set_config("DisableNetwork", "1").await?;
            self.set_config("DisableNetwork", "0").await?;
            Ok(())
        })
    }
}

/// Single-shot deadline for one connection attempt.
///
/// If [`cancel`](Self::cancel) is not called within the delay, the watchdog
/// performs one [`SoftKick`] and reports [`TorError::ConnectionTimeout`].
/// It is never re-armed. Dropping the watchdog cancels it.
#[derive(Debug)]
pub struct RetryWatchdog {
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl RetryWatchdog {
    /// Starts the deadline timer on a new task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm(kicker: Arc<dyn SoftKick>, board: Arc<StatusBoard>, delay: Duration) -> Self {
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let token = cancel.clone();
        let flag = Arc::clone(&fired);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            flag.store(true, Ordering::SeqCst);
            info!(delay_ms = delay.as_millis(), "No Tor circuit yet, toggling network");
            if let Err(e) = kicker.kick().await {
                warn!(error = %e, "Network toggle failed");
            }
            if !token.is_cancelled() {
                board.report(TorError::ConnectionTimeout);
            }
        });

        Self { cancel, fired }
    }

    /// Stops the watchdog. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this watchdog when triggered.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns true if the deadline passed before cancellation.
    #[must_use]
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for RetryWatchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
