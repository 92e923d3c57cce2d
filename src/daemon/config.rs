//! Daemon startup configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::ipv6::Ipv6Capability;
use crate::bridges::BridgesConfiguration;
use crate::control::COOKIE_FILE_NAME;
use crate::error::{TorError, TorResult};
use crate::settings::TorSettings;

/// Name of the client authorization subdirectory.
pub const AUTH_DIRECTORY_NAME: &str = "auth";

/// Everything needed to launch the daemon once.
///
/// Built fresh for every cold start and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfiguration {
    data_directory: PathBuf,
    auth_directory: PathBuf,
    control_host: IpAddr,
    control_port: u16,
    socks_port: u16,
    arguments: Vec<String>,
}

impl DaemonConfiguration {
    /// The daemon's data directory.
    #[must_use]
    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    /// The client authorization directory.
    #[must_use]
    pub fn auth_directory(&self) -> &Path {
        &self.auth_directory
    }

    /// Where the daemon writes its authentication cookie.
    #[must_use]
    pub fn cookie_path(&self) -> PathBuf {
        self.data_directory.join(COOKIE_FILE_NAME)
    }

    /// Loopback address of the control port.
    #[must_use]
    pub const fn control_address(&self) -> SocketAddr {
        SocketAddr::new(self.control_host, self.control_port)
    }

    /// The SOCKS port.
    #[must_use]
    pub const fn socks_port(&self) -> u16 {
        self.socks_port
    }

    /// Command-line arguments for the daemon, in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

/// Builds [`DaemonConfiguration`]s from settings, bridges and host
/// capability.
///
/// # Example
///
/// ```no_run
/// use wallet_tor::bridges::BridgesConfiguration;
/// use wallet_tor::daemon::{ConfigurationBuilder, Ipv6Capability};
/// use wallet_tor::settings::TorSettings;
///
/// let settings = TorSettings::new("/data/wallet");
/// let config = ConfigurationBuilder::new(&settings)
///     .build(&BridgesConfiguration::direct(), Ipv6Capability::DualCapable)
///     .unwrap();
/// assert!(config.arguments().contains(&"--CookieAuthentication".to_string()));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationBuilder<'a> {
    settings: &'a TorSettings,
}

impl<'a> ConfigurationBuilder<'a> {
    /// Creates a builder for the given settings.
    #[must_use]
    pub const fn new(settings: &'a TorSettings) -> Self {
        Self { settings }
    }

    /// Creates the data and auth directories and assembles the argument list.
    ///
    /// # Errors
    ///
    /// Returns [`TorError::Io`] if a directory cannot be created.
    pub fn build(
        &self,
        bridges: &BridgesConfiguration,
        ipv6: Ipv6Capability,
    ) -> TorResult<DaemonConfiguration> {
        let data_directory = self.settings.data_directory.clone();
        let auth_directory = data_directory.join(AUTH_DIRECTORY_NAME);
        for directory in [&data_directory, &auth_directory] {
            std::fs::create_dir_all(directory).map_err(|e| {
                TorError::Io(format!(
                    "Failed to create directory {}: {e}",
                    directory.display()
                ))
            })?;
        }

        let control_host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut arguments = self.base_arguments(&data_directory, &auth_directory, control_host);

        let bridge_lines = bridges.active_lines();
        if !bridge_lines.is_empty() {
            push(&mut arguments, "--UseBridges", "1");
            for line in &bridge_lines {
                push(&mut arguments, "--Bridge", line);
            }
        }

        let uses_bridges = !bridge_lines.is_empty();
        if ipv6 == Ipv6Capability::Ipv6OnlyCapable {
            push(&mut arguments, "--ClientPreferIPv6ORPort", "1");
            push(&mut arguments, "--ClientUseIPv6", "1");
            // Bridges are typically only reachable over IPv4.
            push(
                &mut arguments,
                "--ClientUseIPv4",
                if uses_bridges { "1" } else { "0" },
            );
        } else {
            push(&mut arguments, "--ClientPreferIPv6ORPort", "auto");
            push(&mut arguments, "--ClientUseIPv6", "1");
            push(&mut arguments, "--ClientUseIPv4", "1");
        }

        debug!(
            bridges = bridge_lines.len(),
            ipv6 = ?ipv6,
            arguments = arguments.len(),
            "Built Tor daemon configuration"
        );

        Ok(DaemonConfiguration {
            data_directory,
            auth_directory,
            control_host,
            control_port: self.settings.control_port,
            socks_port: self.settings.socks_port,
            arguments,
        })
    }

    fn base_arguments(
        &self,
        data_directory: &Path,
        auth_directory: &Path,
        control_host: IpAddr,
    ) -> Vec<String> {
        let settings = self.settings;
        let mut arguments = vec!["--ignore-missing-torrc".to_string()];
        push(
            &mut arguments,
            "--DataDirectory",
            &data_directory.display().to_string(),
        );
        push(
            &mut arguments,
            "--ClientOnionAuthDir",
            &auth_directory.display().to_string(),
        );
        push(&mut arguments, "--CookieAuthentication", "1");
        push(
            &mut arguments,
            "--CookieAuthFile",
            &data_directory.join(COOKIE_FILE_NAME).display().to_string(),
        );
        push(&mut arguments, "--AvoidDiskWrites", "1");
        push(&mut arguments, "--SocksPort", &settings.socks_port.to_string());
        push(
            &mut arguments,
            "--ControlPort",
            &SocketAddr::new(control_host, settings.control_port).to_string(),
        );
        push(
            &mut arguments,
            "--ClientTransportPlugin",
            &format!("obfs4 socks5 127.0.0.1:{}", settings.obfs4_port),
        );
        push(
            &mut arguments,
            "--ClientTransportPlugin",
            &format!("snowflake socks5 127.0.0.1:{}", settings.snowflake_port),
        );
        arguments
    }
}

fn push(arguments: &mut Vec<String>, flag: &str, value: &str) {
    arguments.push(flag.to_string());
    arguments.push(value.to_string());
}
