//! Public lifecycle facade.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bootstrap::{AttemptEvent, BootstrapObserver, STATUS_CLIENT_EVENT};
use super::status::{ConnectionStatus, StatusBoard};
use super::watchdog::{RetryWatchdog, SoftKick};
use crate::bridges::{BridgeReconfigurator, BridgesConfiguration};
use crate::control::{AuthenticationCookie, ControlChannel, ControlError};
use crate::daemon::{
    ConfigurationBuilder, DaemonConfiguration, DaemonLauncher, Ipv6Classifier, NoTransportHelper,
    ProcessController, ProcessError, SocketProbe, TransportHelper,
};
use crate::error::{TorError, TorResult};
use crate::settings::TorSettings;
use crate::store::SettingsStore;

/// External collaborators injected into [`TorController`].
///
/// # Example
///
/// ```rust,ignore
/// let collaborators = Collaborators::new(store, Arc::new(TorBinaryLauncher::default()))
///     .with_transports(Arc::new(CommandTransportHelper::new("lyrebird", vec![])));
/// ```
#[derive(Clone)]
pub struct Collaborators {
    /// Preference storage for the bridge configuration.
    pub store: Arc<dyn SettingsStore>,
    /// Host IPv6 capability, consulted on every cold start.
    pub ipv6: Arc<dyn Ipv6Classifier>,
    /// Starts the daemon.
    pub launcher: Arc<dyn DaemonLauncher>,
    /// Starts the pluggable-transport helper.
    pub transports: Arc<dyn TransportHelper>,
}

impl Collaborators {
    /// Uses a [`SocketProbe`] for IPv6 detection and no transport helper.
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStore>, launcher: Arc<dyn DaemonLauncher>) -> Self {
        Self {
            store,
            ipv6: Arc::new(SocketProbe::default()),
            launcher,
            transports: Arc::new(NoTransportHelper),
        }
    }

    /// Replaces the IPv6 classifier.
    #[must_use]
    pub fn with_ipv6(mut self, ipv6: Arc<dyn Ipv6Classifier>) -> Self {
        self.ipv6 = ipv6;
        self
    }

    /// Replaces the transport helper.
    #[must_use]
    pub fn with_transports(mut self, transports: Arc<dyn TransportHelper>) -> Self {
        self.transports = transports;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Drives the embedded Tor daemon from launch to an established circuit.
///
/// # State machine
///
/// ```text
/// Disconnected ──start──> Connecting ──authenticated──> PortsOpen ──circuit──> Connected
///       ^                                                                          │
///       └──────────── Disconnected <──terminated── Disconnecting <──stop── (any) ──┘
/// ```
///
/// `start`, `stop` and the bridge updates are serialized by one async lock,
/// so at most one of them runs at a time per controller.
///
/// # Errors during an attempt
///
/// Failures before authentication make [`start`](Self::start) return the
/// error; it is also published on the error stream. The launched daemon is
/// stopped again so the next `start` is a cold start. Later failures, such
/// as the watchdog's [`TorError::ConnectionTimeout`], only go to the error
/// stream.
///
/// # Example
///
/// ```rust,ignore
/// use wallet_tor::lifecycle::{Collaborators, TorController};
///
/// let controller = TorController::new(settings, collaborators)?;
/// controller.start().await?;
/// controller.wait_for_connected(Duration::from_secs(120)).await?;
/// let proxy = controller.socks_address();
/// ```
pub struct TorController {
    settings: TorSettings,
    ipv6: Arc<dyn Ipv6Classifier>,
    board: Arc<StatusBoard>,
    state: Mutex<ControllerState>,
}

struct ControllerState {
    process: ProcessController,
    reconfigurator: BridgeReconfigurator,
    attempt: Option<Attempt>,
}

/// Resources of one connection attempt, released together on stop.
struct Attempt {
    channel: Arc<ControlChannel>,
    watchdog: RetryWatchdog,
    pump: JoinHandle<()>,
}

impl Attempt {
    async fn shutdown(self) {
        self.pump.abort();
        let _ = self.pump.await;
        self.watchdog.cancel();
        self.channel.disconnect().await;
    }
}

impl TorController {
    /// Creates an idle controller and loads the persisted bridge
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TorError::Store`] if the settings store cannot be read.
    pub fn new(settings: TorSettings, collaborators: Collaborators) -> TorResult<Self> {
        let reconfigurator = BridgeReconfigurator::load(collaborators.store)?;
        Ok(Self {
            settings,
            ipv6: collaborators.ipv6,
            board: Arc::new(StatusBoard::new()),
            state: Mutex::new(ControllerState {
                process: ProcessController::new(collaborators.launcher, collaborators.transports),
                reconfigurator,
                attempt: None,
            }),
        })
    }

    /// Starts the daemon and authenticates the control channel.
    ///
    /// Returns once the channel is authenticated and status is
    /// [`ConnectionStatus::PortsOpen`]. Bootstrap then continues in the
    /// background until [`ConnectionStatus::Connected`].
    ///
    /// # Errors
    ///
    /// - [`TorError::Process`] with [`ProcessError::AlreadyRunning`] if an
    ///   attempt is active
    /// - [`TorError::Io`] if the data directories cannot be created
    /// - [`TorError::ConnectionFailed`] if the control port cannot be
    ///   reached or refuses the cookie
    /// - [`TorError::MissingCookie`] if the cookie file is absent
    pub async fn start(&self) -> TorResult<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state).await
    }

    /// Stops the daemon and releases every attempt resource.
    ///
    /// Safe in any state. On an idle controller nothing is published.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    /// Selects a new bridge configuration and applies it by restarting the
    /// daemon if one is running.
    ///
    /// The configuration is persisted first. A running daemon is always
    /// restarted, even when the selection did not change. If the restart
    /// fails the previous configuration is restored before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns a store error if persisting fails, or the restart's error.
    pub async fn update_bridges_configuration(&self, next: BridgesConfiguration) -> TorResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let changed = state.reconfigurator.stage(next)?;
        if state.attempt.is_none() && !state.process.is_active() {
            if changed {
                state.reconfigurator.commit()?;
            }
            return Ok(());
        }

        info!(
            bridges = state.reconfigurator.current().uses_bridges(),
            changed,
            "Applying bridge configuration, restarting Tor"
        );
        self.stop_locked(state).await;
        match self.start_locked(state).await {
            Ok(()) => {
                state.reconfigurator.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = state.reconfigurator.rollback() {
                    warn!(error = %rollback, "Could not restore previous bridge configuration");
                }
                Err(e)
            }
        }
    }

    /// Selects a new bridge configuration and pushes it over the control
    /// channel without restarting the daemon.
    ///
    /// Without an authenticated channel the configuration is only persisted
    /// and takes effect on the next start. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns a store error if persisting fails, or the control error of
    /// the first rejected command. The previous configuration is restored in
    /// that case.
    pub async fn reconfigure_live(&self, next: BridgesConfiguration) -> TorResult<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if !state.reconfigurator.stage(next)? {
            return Ok(false);
        }

        let channel = state
            .attempt
            .as_ref()
            .map(|attempt| Arc::clone(&attempt.channel))
            .filter(|channel| channel.is_authenticated());
        let Some(channel) = channel else {
            state.reconfigurator.commit()?;
            return Ok(true);
        };

        if let Err(e) = state.reconfigurator.apply_live(&channel).await {
            if let Err(rollback) = state.reconfigurator.rollback() {
                warn!(error = %rollback, "Could not restore previous bridge configuration");
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Current connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.board.status()
    }

    /// Current bootstrap progress, 0 to 100.
    #[must_use]
    pub fn bootstrap_progress(&self) -> u8 {
        self.board.progress()
    }

    /// Stream of status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.board.subscribe_status()
    }

    /// Stream of bootstrap progress values.
    #[must_use]
    pub fn subscribe_progress(&self) -> broadcast::Receiver<u8> {
        self.board.subscribe_progress()
    }

    /// Stream of reported errors.
    #[must_use]
    pub fn subscribe_errors(&self) -> broadcast::Receiver<TorError> {
        self.board.subscribe_errors()
    }

    /// Receiver that always holds the current status.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.board.watch_status()
    }

    /// Waits until status is [`ConnectionStatus::Connected`].
    ///
    /// # Errors
    ///
    /// Returns [`TorError::ConnectionTimeout`] if the timeout elapses first.
    pub async fn wait_for_connected(&self, timeout: Duration) -> TorResult<()> {
        let mut status = self.board.watch_status();
        tokio::time::timeout(timeout, status.wait_for(|status| status.is_connected()))
            .await
            .map_err(|_| TorError::ConnectionTimeout)?
            .map_err(|e| TorError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }

    /// Address of the SOCKS proxy wallet traffic must use.
    #[must_use]
    pub const fn socks_address(&self) -> SocketAddr {
        self.settings.socks_address()
    }

    /// The settings this controller was created with.
    #[must_use]
    pub const fn settings(&self) -> &TorSettings {
        &self.settings
    }

    /// The selected bridge configuration.
    pub async fn bridges_configuration(&self) -> BridgesConfiguration {
        self.state.lock().await.reconfigurator.current().clone()
    }

    async fn start_locked(&self, state: &mut ControllerState) -> TorResult<()> {
        if state.process.is_active() || state.attempt.is_some() {
            return Err(ProcessError::AlreadyRunning.into());
        }

        self.board.set_status(ConnectionStatus::Connecting);

        let config = ConfigurationBuilder::new(&self.settings)
            .build(state.reconfigurator.current(), self.ipv6.classify())
            .map_err(|e| self.fail(e))?;
        state.process.start(&config).map_err(|e| self.fail(e.into()))?;

        let channel = match self.open_channel(&config).await {
            Ok(channel) => channel,
            Err(e) => {
                state.process.stop().await;
                return Err(self.fail(e));
            }
        };
        self.board.set_status(ConnectionStatus::PortsOpen);

        state.attempt = Some(self.begin_bootstrap(channel).await);
        Ok(())
    }

    async fn stop_locked(&self, state: &mut ControllerState) {
        if state.attempt.is_none()
            && !state.process.is_active()
            && self.board.status() == ConnectionStatus::Disconnected
        {
            debug!("Stop requested with nothing running");
            return;
        }

        self.board.set_status(ConnectionStatus::Disconnecting);
        if let Some(attempt) = state.attempt.take() {
            attempt.shutdown().await;
        }
        state.process.stop().await;
        self.board.reset_progress();
        self.board.set_status(ConnectionStatus::Disconnected);
    }

    async fn open_channel(&self, config: &DaemonConfiguration) -> TorResult<Arc<ControlChannel>> {
        let channel = Arc::new(ControlChannel::new(config.control_address()));
        self.connect_with_retries(&channel).await?;

        let authenticated = match AuthenticationCookie::read_from(&config.cookie_path()) {
            Ok(cookie) => channel
                .authenticate(&cookie)
                .await
                .map_err(|e| TorError::ConnectionFailed(e.to_string())),
            Err(e) => Err(e),
        };
        if let Err(e) = authenticated {
            channel.disconnect().await;
            return Err(e);
        }
        Ok(channel)
    }

    async fn connect_with_retries(&self, channel: &ControlChannel) -> TorResult<()> {
        let attempts = self.settings.control_connect_attempts.max(1);
        let mut last_error = ControlError::NotConnected;

        for attempt in 1..=attempts {
            match channel.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(attempt, attempts, error = %e, "Control port not ready");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.control_connect_interval).await;
            }
        }
        Err(TorError::ConnectionFailed(last_error.to_string()))
    }

    /// Subscribes to bootstrap events and arms the watchdog. Failures here
    /// are reported on the error stream; the watchdog still covers the
    /// attempt.
    async fn begin_bootstrap(&self, channel: Arc<ControlChannel>) -> Attempt {
        let (bootstrap, events) = BootstrapObserver::new();
        if let Err(e) = bootstrap.register(&channel) {
            self.board.report(e.into());
        }
        if let Err(e) = channel.set_events(&[STATUS_CLIENT_EVENT]).await {
            self.board.report(e.into());
        }

        let watchdog = RetryWatchdog::arm(
            Arc::clone(&channel) as Arc<dyn SoftKick>,
            Arc::clone(&self.board),
            self.settings.connect_timeout,
        );
        let pump = tokio::spawn(apply_events(events, Arc::clone(&self.board), watchdog.token()));

        if let Err(e) = bootstrap.catch_up(&channel).await {
            warn!(error = %e, "Bootstrap catch-up query failed");
        }

        Attempt {
            channel,
            watchdog,
            pump,
        }
    }

    fn fail(&self, error: TorError) -> TorError {
        self.board.report(error.clone());
        error
    }
}

impl std::fmt::Debug for TorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorController")
            .field("settings", &self.settings)
            .field("status", &self.board.status())
            .field("progress", &self.board.progress())
            .finish_non_exhaustive()
    }
}

async fn apply_events(
    mut events: mpsc::UnboundedReceiver<AttemptEvent>,
    board: Arc<StatusBoard>,
    watchdog: CancellationToken,
) {
    while let Some(event) = events.recv().await {
        match event {
            AttemptEvent::Progress(value) => {
                board.advance_progress(value);
            }
            AttemptEvent::CircuitEstablished => {
                watchdog.cancel();
                board.set_status(ConnectionStatus::Connected);
            }
        }
    }
}
