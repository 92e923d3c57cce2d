//! Reusable test helpers for lifecycle integration tests.
//!
//! [`FakeTor`] listens on a loopback port and speaks just enough of the
//! control protocol to drive a [`TorController`] through an attempt: it
//! checks the cookie, records every command, and emits scripted
//! `STATUS_CLIENT` events after `SETEVENTS`. [`FakeLauncher`] stands in
//! for the daemon process and writes the cookie the way the daemon would.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wallet_tor::daemon::{
    DaemonConfiguration, DaemonLauncher, DaemonTask, Ipv6Capability, ProcessError, ProcessResult,
};
use wallet_tor::store::MemoryStore;
use wallet_tor::{Collaborators, TorController, TorSettings};

/// Cookie the fake daemon writes and expects.
pub const COOKIE: [u8; 32] = [0x5a; 32];

/// Bootstrap events for an attempt that completes.
pub const BOOTSTRAP_TO_CIRCUIT: &[&str] = &[
    "STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=10 TAG=conn_done SUMMARY=\"Connected to a relay\"",
    "STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=50 TAG=loading_descriptors SUMMARY=\"Loading relay descriptors\"",
    "STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=100 TAG=done SUMMARY=\"Done\"",
    "STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED",
];

/// Bootstrap events for an attempt that stalls before any circuit.
pub const BOOTSTRAP_STALLS: &[&str] = &[
    "STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=5 TAG=conn SUMMARY=\"Connecting to a relay\"",
];

/// How the fake daemon behaves on each control connection.
#[derive(Debug, Clone)]
pub struct Script {
    /// Event lines sent right after the `SETEVENTS` reply.
    pub events: Vec<String>,
    /// Value of `GETINFO status/bootstrap-phase`.
    pub bootstrap_phase: String,
    /// Value of `GETINFO status/circuit-established`.
    pub circuit_established: bool,
    /// Cookie accepted by `AUTHENTICATE`.
    pub cookie: Vec<u8>,
}

impl Script {
    /// Emits the given events and reports nothing through `GETINFO`.
    pub fn events(events: &[&str]) -> Self {
        Self {
            events: events.iter().map(|event| (*event).to_string()).collect(),
            bootstrap_phase: "NOTICE BOOTSTRAP PROGRESS=0 TAG=starting SUMMARY=\"Starting\""
                .to_string(),
            circuit_established: false,
            cookie: COOKIE.to_vec(),
        }
    }
}

/// Scripted control port.
pub struct FakeTor {
    address: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

impl FakeTor {
    /// Starts listening on an ephemeral loopback port.
    pub async fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let server = {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, script.clone(), Arc::clone(&commands)));
                }
            })
        };

        Self {
            address,
            commands,
            connections,
            server,
        }
    }

    /// The control port.
    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Every command received so far, across connections.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Number of received commands equal to `command`.
    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == command).count()
    }

    /// Stops accepting connections and closes the listening socket.
    pub async fn close(&mut self) {
        self.server.abort();
        let _ = (&mut self.server).await;
    }

    /// Number of control connections accepted.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeTor {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(stream: TcpStream, script: Script, commands: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let expected_auth = format!("AUTHENTICATE {}", hex::encode(&script.cookie));

    while let Ok(Some(line)) = lines.next_line().await {
        commands.lock().unwrap().push(line.clone());

        let reply = if line.starts_with("AUTHENTICATE") {
            if line == expected_auth {
                "250 OK\r\n".to_string()
            } else {
                "515 Authentication failed: Authentication cookie did not match expected value.\r\n"
                    .to_string()
            }
        } else if line.starts_with("SETEVENTS") {
            let mut reply = "250 OK\r\n".to_string();
            for event in &script.events {
                reply.push_str(&format!("650 {event}\r\n"));
            }
            reply
        } else if line == "GETINFO status/bootstrap-phase" {
            format!("250-status/bootstrap-phase={}\r\n250 OK\r\n", script.bootstrap_phase)
        } else if line == "GETINFO status/circuit-established" {
            let value = u8::from(script.circuit_established);
            format!("250-status/circuit-established={value}\r\n250 OK\r\n")
        } else if line.starts_with("GETINFO") {
            "552 Unrecognized key\r\n".to_string()
        } else {
            "250 OK\r\n".to_string()
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Stands in for the daemon process.
#[derive(Default)]
pub struct FakeLauncher {
    skip_cookie: bool,
    launches: AtomicUsize,
    stops: Arc<AtomicUsize>,
    arguments: Mutex<Vec<Vec<String>>>,
}

impl FakeLauncher {
    /// Writes the cookie on launch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Never writes a cookie.
    pub fn without_cookie() -> Self {
        Self {
            skip_cookie: true,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Argument list of the most recent launch.
    pub fn last_arguments(&self) -> Vec<String> {
        self.arguments.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl DaemonLauncher for FakeLauncher {
    fn launch(
        &self,
        config: &DaemonConfiguration,
        cancel: CancellationToken,
    ) -> ProcessResult<DaemonTask> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.arguments
            .lock()
            .unwrap()
            .push(config.arguments().to_vec());

        let cookie_path = config.cookie_path();
        if self.skip_cookie {
            let _ = std::fs::remove_file(&cookie_path);
        } else {
            std::fs::write(&cookie_path, COOKIE).map_err(|e| ProcessError::Launch(e.to_string()))?;
        }

        let stops = Arc::clone(&self.stops);
        Ok(Box::pin(async move {
            cancel.cancelled().await;
            stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }
}

/// Settings pointing at the fake control port with short retry intervals.
pub fn settings(app_storage: &Path, control_port: u16, watchdog: Duration) -> TorSettings {
    TorSettings {
        control_port,
        connect_timeout: watchdog,
        control_connect_attempts: 5,
        control_connect_interval: Duration::from_millis(20),
        ..TorSettings::new(app_storage)
    }
}

/// Controller wired to the given launcher and store.
pub fn controller(
    settings: TorSettings,
    launcher: Arc<FakeLauncher>,
    store: Arc<MemoryStore>,
) -> TorController {
    let collaborators = Collaborators::new(store, launcher)
        .with_ipv6(Arc::new(Ipv6Capability::DualCapable));
    TorController::new(settings, collaborators).unwrap()
}

/// Everything currently buffered on a broadcast receiver.
pub fn drain<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut values = Vec::new();
    while let Ok(value) = receiver.try_recv() {
        values.push(value);
    }
    values
}

/// Waits up to five seconds for the next value on a broadcast receiver.
pub async fn next<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for a value")
        .expect("stream closed")
}
