//! Wallet Tor Library
//!
//! Connection lifecycle controller for the Tor daemon embedded in a
//! privacy-preserving wallet. No wallet traffic may leave the device until
//! [`TorController`] reports [`ConnectionStatus::Connected`]; after that
//! all of it goes through [`TorController::socks_address`].
//!
//! # Modules
//!
//! - [`settings`]: ports, directories and timeouts
//! - [`store`]: preference persistence
//! - [`bridges`]: bridge selection and reconfiguration
//! - [`daemon`]: startup arguments and process supervision
//! - [`control`]: the authenticated control channel
//! - [`lifecycle`]: the public facade and its observable state

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod bridges;
pub mod control;
pub mod daemon;
mod error;
pub mod lifecycle;
pub mod settings;
pub mod store;

pub use bridges::{BridgesConfiguration, BridgesType};
pub use error::{TorError, TorResult};
pub use lifecycle::{Collaborators, ConnectionStatus, TorController};
pub use settings::TorSettings;
