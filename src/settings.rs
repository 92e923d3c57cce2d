//! Controller settings.
//!
//! The daemon listens on fixed local ports so that the wallet and the
//! pluggable-transport helper can find it without discovery. The values
//! here are the defaults; a JSON override document may replace any of them.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the daemon's data directory under the application storage root.
pub const DATA_DIRECTORY_NAME: &str = "tor";

/// Default SOCKS port exposed to the wallet.
pub const DEFAULT_SOCKS_PORT: u16 = 39050;

/// Default loopback control port.
pub const DEFAULT_CONTROL_PORT: u16 = 39060;

/// Default local port of the obfs4 transport helper.
pub const DEFAULT_OBFS4_PORT: u16 = 47351;

/// Default local port of the snowflake transport helper.
pub const DEFAULT_SNOWFLAKE_PORT: u16 = 52610;

/// Delay before the retry watchdog fires.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for the Tor lifecycle controller.
///
/// # Example
///
/// ```
/// use wallet_tor::settings::TorSettings;
///
/// let settings = TorSettings::new("/data/wallet");
/// assert!(settings.data_directory.ends_with("tor"));
/// assert_eq!(settings.socks_port, 39050);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorSettings {
    /// Daemon data directory (`<app-storage>/tor`).
    pub data_directory: PathBuf,

    /// SOCKS port the wallet routes traffic through.
    pub socks_port: u16,

    /// Control port, bound to loopback only.
    pub control_port: u16,

    /// Local port the obfs4 helper listens on.
    pub obfs4_port: u16,

    /// Local port the snowflake helper listens on.
    pub snowflake_port: u16,

    /// Delay after which the watchdog nudges a stalled attempt.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// How many times to try the control port before giving up.
    pub control_connect_attempts: u32,

    /// Pause between control port connection attempts.
    #[serde(with = "millis")]
    pub control_connect_interval: Duration,
}

impl Default for TorSettings {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from(DATA_DIRECTORY_NAME),
            socks_port: DEFAULT_SOCKS_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            obfs4_port: DEFAULT_OBFS4_PORT,
            snowflake_port: DEFAULT_SNOWFLAKE_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            control_connect_attempts: 20,
            control_connect_interval: Duration::from_millis(250),
        }
    }
}

impl TorSettings {
    /// Creates default settings rooted at the given application storage
    /// directory.
    pub fn new(app_storage: impl AsRef<Path>) -> Self {
        Self {
            data_directory: app_storage.as_ref().join(DATA_DIRECTORY_NAME),
            ..Self::default()
        }
    }

    /// Parses settings from a JSON document. Missing fields keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or a field has
    /// the wrong type.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Address of the loopback control port.
    #[must_use]
    pub const fn control_address(&self) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), self.control_port)
    }

    /// Address of the SOCKS proxy the wallet should use.
    #[must_use]
    pub const fn socks_address(&self) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), self.socks_port)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)] // serde's `with` signature.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
