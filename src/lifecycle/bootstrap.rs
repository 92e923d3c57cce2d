//! Bootstrap progress and circuit detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::control::{ControlChannel, ControlEvent, ControlResult, ObserverFlow};

/// Event kind carrying client bootstrap and circuit status.
pub const STATUS_CLIENT_EVENT: &str = "STATUS_CLIENT";

const BOOTSTRAP_ACTION: &str = "BOOTSTRAP";
const CIRCUIT_ESTABLISHED_ACTION: &str = "CIRCUIT_ESTABLISHED";
const BOOTSTRAP_PHASE_INFO: &str = "status/bootstrap-phase";
const CIRCUIT_ESTABLISHED_INFO: &str = "status/circuit-established";

/// What the observers tell the attempt task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEvent {
    /// Bootstrap reached a new, higher percentage.
    Progress(u8),
    /// The first circuit is up.
    CircuitEstablished,
}

/// Turns raw progress reports into a strictly increasing sequence.
///
/// Values above 100 are clamped. A value is accepted only if it is higher
/// than every value accepted before it, so nothing is accepted after 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    /// Creates a tracker at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Feeds a reported value. Returns the value to publish, if any.
    pub fn observe(&mut self, reported: u32) -> Option<u8> {
        let value = u8::try_from(reported.min(100)).unwrap_or(100);
        if value <= self.last {
            return None;
        }
        self.last = value;
        Some(value)
    }

    /// Highest value accepted so far.
    #[must_use]
    pub const fn last(&self) -> u8 {
        self.last
    }

    /// Returns true once 100 has been accepted.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.last >= 100
    }
}

/// Interprets `STATUS_CLIENT` events for one connection attempt.
///
/// Handlers run on the channel's reader task and only enqueue
/// [`AttemptEvent`]s; the attempt task applies them.
///
/// ```text
/// STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=n ──> ProgressTracker ──> Progress(n)
/// STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED ───> once ─────────────> CircuitEstablished
/// ```
#[derive(Debug, Clone)]
pub struct BootstrapObserver {
    events: mpsc::UnboundedSender<AttemptEvent>,
    progress: Arc<Mutex<ProgressTracker>>,
    circuit_signalled: Arc<AtomicBool>,
}

impl BootstrapObserver {
    /// Creates an observer and the receiving end of its event queue.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AttemptEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let observer = Self {
            events,
            progress: Arc::new(Mutex::new(ProgressTracker::new())),
            circuit_signalled: Arc::new(AtomicBool::new(false)),
        };
        (observer, receiver)
    }

    /// Registers the progress observer and the one-shot circuit observer.
    ///
    /// The progress observer unregisters itself at 100.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not authenticated.
    pub fn register(&self, channel: &ControlChannel) -> ControlResult<()> {
        let progress = self.clone();
        channel.observe(
            |event| is_client_status(event, BOOTSTRAP_ACTION),
            move |event| progress.record_progress(event),
        )?;

        let circuit = self.clone();
        channel.observe(
            |event| is_client_status(event, CIRCUIT_ESTABLISHED_ACTION),
            move |_| {
                circuit.signal_circuit();
                ObserverFlow::Done
            },
        )?;
        Ok(())
    }

    /// Queries the daemon for state reached before the event subscription
    /// took effect.
    ///
    /// # Errors
    ///
    /// Returns an error if a `GETINFO` query fails.
    pub async fn catch_up(&self, channel: &ControlChannel) -> ControlResult<()> {
        if let Some(phase) = channel.get_info(BOOTSTRAP_PHASE_INFO).await? {
            let event = ControlEvent::parse(&format!("{STATUS_CLIENT_EVENT} {phase}"))?;
            if is_client_status(&event, BOOTSTRAP_ACTION) {
                self.record_progress(&event);
            }
        }
        if channel.get_info(CIRCUIT_ESTABLISHED_INFO).await?.as_deref() == Some("1") {
            self.signal_circuit();
        }
        Ok(())
    }

    /// Returns true once the circuit signal has been sent.
    #[must_use]
    pub fn circuit_signalled(&self) -> bool {
        self.circuit_signalled.load(Ordering::SeqCst)
    }

    fn record_progress(&self, event: &ControlEvent) -> ObserverFlow {
        let Some(reported) = event.argument("PROGRESS").and_then(|p| p.parse::<u32>().ok()) else {
            debug!(?event, "Bootstrap event without a usable PROGRESS");
            return ObserverFlow::Continue;
        };

        let mut tracker = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = tracker.observe(reported) {
            let _ = self.events.send(AttemptEvent::Progress(value));
        }
        if tracker.is_complete() {
            ObserverFlow::Done
        } else {
            ObserverFlow::Continue
        }
    }

    fn signal_circuit(&self) {
        if !self.circuit_signalled.swap(true, Ordering::SeqCst) {
            info!("Tor circuit established");
            let _ = self.events.send(AttemptEvent::CircuitEstablished);
        }
    }
}

fn is_client_status(event: &ControlEvent, action: &str) -> bool {
    event.kind() == STATUS_CLIENT_EVENT && event.status_action() == Some(action)
}
