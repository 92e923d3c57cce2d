//! Host IPv6 capability.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use serde::{Deserialize, Serialize};

/// What the host network can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Ipv6Capability {
    /// IPv4 only.
    NoneCapable,
    /// Both IPv4 and IPv6.
    DualCapable,
    /// IPv6 only (e.g. NAT64 mobile networks).
    Ipv6OnlyCapable,
    /// Could not be determined.
    #[default]
    Unknown,
}

/// Source of the host's current IPv6 capability.
///
/// Consulted once per cold start, so an implementation may probe the
/// network each time it is called.
pub trait Ipv6Classifier: Send + Sync {
    /// Classifies the host's connectivity.
    fn classify(&self) -> Ipv6Capability;
}

impl Ipv6Classifier for Ipv6Capability {
    fn classify(&self) -> Ipv6Capability {
        *self
    }
}

/// Classifies connectivity by asking the OS for a route.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketProbe {
    v4_target: SocketAddr,
    v6_target: SocketAddr,
}

impl Default for SocketProbe {
    fn default() -> Self {
        Self {
            v4_target: SocketAddr::from((Ipv4Addr::new(8, 8, 8, 8), 53)),
            v6_target: SocketAddr::from((
                Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888),
                53,
            )),
        }
    }
}

impl SocketProbe {
    /// Creates a probe that routes towards the given addresses.
    #[must_use]
    pub const fn with_targets(v4_target: SocketAddr, v6_target: SocketAddr) -> Self {
        Self {
            v4_target,
            v6_target,
        }
    }

    fn can_route(target: SocketAddr) -> bool {
        let bind = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        UdpSocket::bind(bind)
            .and_then(|socket| socket.connect(target))
            .is_ok()
    }
}

impl Ipv6Classifier for SocketProbe {
    fn classify(&self) -> Ipv6Capability {
        match (Self::can_route(self.v4_target), Self::can_route(self.v6_target)) {
            (true, true) => Ipv6Capability::DualCapable,
            (true, false) => Ipv6Capability::NoneCapable,
            (false, true) => Ipv6Capability::Ipv6OnlyCapable,
            (false, false) => Ipv6Capability::Unknown,
        }
    }
}
