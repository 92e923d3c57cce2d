//! Daemon process supervision.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::DaemonConfiguration;
use super::error::{ProcessError, ProcessResult};

/// Future that runs the daemon until it exits or its cancellation token
/// fires.
pub type DaemonTask = BoxFuture<'static, ProcessResult<()>>;

/// Starts the daemon.
///
/// The returned future is spawned on its own task by [`ProcessController`]
/// and must resolve promptly once `cancel` is triggered.
pub trait DaemonLauncher: Send + Sync {
    /// Prepares the daemon for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Launch`] if the daemon cannot be started.
    fn launch(
        &self,
        config: &DaemonConfiguration,
        cancel: CancellationToken,
    ) -> ProcessResult<DaemonTask>;
}

/// Starts the local pluggable-transport helper.
///
/// Started after the daemon. A helper that fails to start is logged and
/// does not affect the connection attempt. A helper that did start lives
/// exactly as long as the daemon: it shares the daemon's cancellation
/// token and is awaited by [`ProcessController::stop`].
pub trait TransportHelper: Send + Sync {
    /// Starts the helper. The returned future must resolve promptly once
    /// `cancel` is triggered.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Helper`] if the helper cannot be started.
    fn start(
        &self,
        config: &DaemonConfiguration,
        cancel: CancellationToken,
    ) -> ProcessResult<DaemonTask>;
}

/// A daemon task that is (or was) running.
#[derive(Debug)]
pub struct RunningDaemon {
    cancel: CancellationToken,
    task: JoinHandle<ProcessResult<()>>,
    helper: Option<JoinHandle<ProcessResult<()>>>,
}

impl RunningDaemon {
    /// Returns true if the daemon task has ended on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Lifecycle of the daemon's execution unit.
#[derive(Debug, Default)]
pub enum ProcessState {
    /// Never started on this controller.
    #[default]
    NotStarted,
    /// Launched and not yet stopped.
    Running(RunningDaemon),
    /// Stopped; the next start is a cold start.
    Stopped,
}

impl ProcessState {
    /// Returns true while a daemon task is alive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running(daemon) if !daemon.is_finished())
    }
}

/// Owns the daemon's background task.
///
/// # Example
///
/// ```rust,ignore
/// let mut process = ProcessController::new(launcher, transports);
/// process.start(&config)?;
/// // ...
/// process.stop().await;
/// ```
pub struct ProcessController {
    launcher: Arc<dyn DaemonLauncher>,
    transports: Arc<dyn TransportHelper>,
    state: ProcessState,
}

impl ProcessController {
    /// Creates a controller with nothing running.
    #[must_use]
    pub fn new(launcher: Arc<dyn DaemonLauncher>, transports: Arc<dyn TransportHelper>) -> Self {
        Self {
            launcher,
            transports,
            state: ProcessState::NotStarted,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ProcessState {
        &self.state
    }

    /// Returns true while the daemon task is alive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Launches the daemon on a new task, then the transport helper on
    /// another.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::AlreadyRunning`] if a daemon is active, or the
    /// launcher's error if the daemon cannot be started.
    pub fn start(&mut self, config: &DaemonConfiguration) -> ProcessResult<()> {
        if let ProcessState::Running(daemon) = &self.state {
            if !daemon.is_finished() {
                return Err(ProcessError::AlreadyRunning);
            }
            warn!("Tor daemon exited on its own; starting a new one");
            daemon.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.launcher.launch(config, cancel.clone())?);
        info!(
            data_directory = %config.data_directory().display(),
            control = %config.control_address(),
            "Tor daemon launched"
        );

        let helper = match self.transports.start(config, cancel.clone()) {
            Ok(helper) => Some(tokio::spawn(helper)),
            Err(e) => {
                warn!(error = %e, "Transport helper did not start");
                None
            }
        };
        self.state = ProcessState::Running(RunningDaemon {
            cancel,
            task,
            helper,
        });
        Ok(())
    }

    /// Cancels the daemon and the transport helper and waits until both
    /// tasks have terminated.
    ///
    /// Resolves immediately if nothing is running.
    pub async fn stop(&mut self) {
        let ProcessState::Running(daemon) = std::mem::take(&mut self.state) else {
            return;
        };
        self.state = ProcessState::Stopped;

        daemon.cancel.cancel();
        match daemon.task.await {
            Ok(Ok(())) => info!("Tor daemon stopped"),
            Ok(Err(e)) => warn!(error = %e, "Tor daemon ended with an error"),
            Err(e) => warn!(error = %e, "Tor daemon task failed"),
        }
        if let Some(helper) = daemon.helper {
            match helper.await {
                Ok(Ok(())) => info!("Transport helper stopped"),
                Ok(Err(e)) => warn!(error = %e, "Transport helper ended with an error"),
                Err(e) => warn!(error = %e, "Transport helper task failed"),
            }
        }
    }
}

impl std::fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessController")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
