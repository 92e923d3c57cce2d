//! Bridge selection and reconfiguration.
//!
//! Users on censored networks reach Tor through bridges: unlisted entry
//! relays, usually wrapped in a pluggable transport such as obfs4 or
//! snowflake. The selected configuration is persisted through the
//! [`SettingsStore`](crate::store::SettingsStore) and applied either by a
//! full daemon restart or live over the control channel.

mod reconfigure;
mod types;

pub use reconfigure::{BridgeReconfigurator, BACKUP_BRIDGES_KEY, CURRENT_BRIDGES_KEY};
pub use types::{BridgesConfiguration, BridgesType};
