//! Bridge configuration types.

use serde::{Deserialize, Serialize};

/// Which kind of bridges the daemon should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BridgesType {
    /// Connect to the network directly.
    #[default]
    None,
    /// Connect through user-supplied bridge lines.
    Custom,
}

/// The user's bridge selection.
///
/// Two configurations are equal only if the type matches and the custom
/// bridge lists match element for element. An absent list and an empty
/// list are different values.
///
/// # Example
///
/// ```
/// use wallet_tor::bridges::BridgesConfiguration;
///
/// let direct = BridgesConfiguration::direct();
/// let custom = BridgesConfiguration::custom(vec![
///     "obfs4 192.0.2.10:443 FINGERPRINT cert=abc iat-mode=0".to_string(),
/// ]);
///
/// assert!(!direct.uses_bridges());
/// assert!(custom.uses_bridges());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BridgesConfiguration {
    /// Selected bridge type.
    pub bridges_type: BridgesType,

    /// Transport lines, in the order the user entered them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_bridges: Option<Vec<String>>,
}

impl BridgesConfiguration {
    /// A configuration that connects without bridges.
    #[must_use]
    pub const fn direct() -> Self {
        Self {
            bridges_type: BridgesType::None,
            custom_bridges: None,
        }
    }

    /// A configuration that uses the given bridge lines.
    #[must_use]
    pub const fn custom(lines: Vec<String>) -> Self {
        Self {
            bridges_type: BridgesType::Custom,
            custom_bridges: Some(lines),
        }
    }

    /// Returns the bridge lines that should actually be applied.
    ///
    /// Lines are only active when the type is [`BridgesType::Custom`]; blank
    /// lines are skipped and surrounding whitespace is trimmed.
    #[must_use]
    pub fn active_lines(&self) -> Vec<&str> {
        if self.bridges_type != BridgesType::Custom {
            return Vec::new();
        }
        self.custom_bridges
            .iter()
            .flatten()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Returns true if the daemon should route through bridges.
    #[must_use]
    pub fn uses_bridges(&self) -> bool {
        !self.active_lines().is_empty()
    }
}
