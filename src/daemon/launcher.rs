//! Launchers backed by external executables.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::DaemonConfiguration;
use super::error::{ProcessError, ProcessResult};
use super::process::{DaemonLauncher, DaemonTask, TransportHelper};

/// Runs a `tor` executable with the built argument list.
///
/// The daemon's notice log is forwarded to `tracing` at debug level under
/// the `tor` target. Cancellation kills the process.
#[derive(Debug, Clone)]
pub struct TorBinaryLauncher {
    program: PathBuf,
}

impl TorBinaryLauncher {
    /// Uses the executable at the given path (or on `PATH`).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for TorBinaryLauncher {
    fn default() -> Self {
        Self::new("tor")
    }
}

impl DaemonLauncher for TorBinaryLauncher {
    fn launch(
        &self,
        config: &DaemonConfiguration,
        cancel: CancellationToken,
    ) -> ProcessResult<DaemonTask> {
        let mut child = Command::new(&self.program)
            .args(config.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Launch(format!("{}: {e}", self.program.display())))?;
        let stdout = child.stdout.take();

        Ok(Box::pin(async move {
            if let Some(stdout) = stdout {
                tokio::spawn(forward_log(stdout));
            }

            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| ProcessError::Exited(e.to_string()))?;
                    if status.success() {
                        Ok(())
                    } else {
                        Err(ProcessError::Exited(status.to_string()))
                    }
                }
                () = cancel.cancelled() => {
                    child
                        .kill()
                        .await
                        .map_err(|e| ProcessError::Exited(format!("kill failed: {e}")))
                }
            }
        }))
    }
}

async fn forward_log(stdout: ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "tor", "{line}");
    }
}

/// Runs a pluggable-transport helper executable next to the daemon.
///
/// Cancellation kills the helper. It is also killed if its task is dropped.
#[derive(Debug, Clone)]
pub struct CommandTransportHelper {
    program: PathBuf,
    arguments: Vec<String>,
}

impl CommandTransportHelper {
    /// Uses the given executable and arguments.
    pub fn new(program: impl Into<PathBuf>, arguments: Vec<String>) -> Self {
        Self {
            program: program.into(),
            arguments,
        }
    }
}

impl TransportHelper for CommandTransportHelper {
    fn start(
        &self,
        _config: &DaemonConfiguration,
        cancel: CancellationToken,
    ) -> ProcessResult<DaemonTask> {
        let mut child = Command::new(&self.program)
            .args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Helper(format!("{}: {e}", self.program.display())))?;
        info!(pid = ?child.id(), program = %self.program.display(), "Transport helper started");

        Ok(Box::pin(async move {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| ProcessError::Helper(e.to_string()))?;
                    warn!(%status, "Transport helper exited on its own");
                    Ok(())
                }
                () = cancel.cancelled() => {
                    child
                        .kill()
                        .await
                        .map_err(|e| ProcessError::Helper(format!("kill failed: {e}")))
                }
            }
        }))
    }
}

/// Helper for hosts that do not run pluggable transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransportHelper;

impl TransportHelper for NoTransportHelper {
    fn start(
        &self,
        _config: &DaemonConfiguration,
        _cancel: CancellationToken,
    ) -> ProcessResult<DaemonTask> {
        Ok(Box::pin(async { Ok(()) }))
    }
}
