//! Embedded Tor daemon: startup configuration and process supervision.
//!
//! ```text
//! ConfigurationBuilder ── DaemonConfiguration ──> ProcessController
//!                                                    ├── DaemonLauncher   (own task)
//!                                                    └── TransportHelper  (own task)
//! ```
//!
//! The daemon is launched through the [`DaemonLauncher`] trait so the host
//! can run a bundled executable ([`TorBinaryLauncher`]) or an in-process
//! daemon library alike.
//! The transport helper shares the daemon's cancellation and stops with it.

mod config;
mod error;
mod ipv6;
mod launcher;
mod process;

pub use config::{ConfigurationBuilder, DaemonConfiguration, AUTH_DIRECTORY_NAME};
pub use error::{ProcessError, ProcessResult};
pub use ipv6::{Ipv6Capability, Ipv6Classifier, SocketProbe};
pub use launcher::{CommandTransportHelper, NoTransportHelper, TorBinaryLauncher};
pub use process::{
    DaemonLauncher, DaemonTask, ProcessController, ProcessState, RunningDaemon, TransportHelper,
};
