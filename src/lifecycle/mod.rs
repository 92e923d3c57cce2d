//! Tor connection lifecycle.
//!
//! [`TorController`] is the only type most hosts need. It launches the
//! daemon, authenticates the control channel, follows bootstrap, and
//! applies bridge changes.
//!
//! # Architecture
//!
//! ```text
//! TorController
//!     ├── ProcessController ──────── daemon task
//!     ├── ControlChannel
//!     │       └── reader task ──> BootstrapObserver ──> AttemptEvent queue
//!     │                                                      │
//!     ├── attempt task <─────────────────────────────────────┘
//!     │       └── StatusBoard (status, progress, errors)
//!     └── RetryWatchdog ──> SoftKick (DisableNetwork 1, 0)
//! ```
//!
//! # Observable surface
//!
//! | Stream | Values |
//! |--------|--------|
//! | status | [`ConnectionStatus`] transitions |
//! | progress | bootstrap percentage, strictly increasing per attempt |
//! | errors | [`TorError`] values, fatal or not |
//!
//! Only the controller writes to these streams.

mod bootstrap;
mod controller;
mod status;
mod watchdog;

pub use bootstrap::{AttemptEvent, BootstrapObserver, ProgressTracker, STATUS_CLIENT_EVENT};
pub use controller::{Collaborators, TorController};
pub use status::{ConnectionStatus, StatusBoard};
pub use watchdog::{RetryWatchdog, SoftKick};

pub use crate::error::{TorError, TorResult};
