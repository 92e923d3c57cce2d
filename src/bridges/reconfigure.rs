//! Bridge reconfiguration state.

use std::sync::Arc;

use tracing::{info, warn};

use super::types::BridgesConfiguration;
use crate::control::ControlChannel;
use crate::error::TorResult;
use crate::store::{SettingsStore, StoreError, StoreResult};

/// Store key of the configuration the daemon should use.
pub const CURRENT_BRIDGES_KEY: &str = "tor.bridges.current";

/// Store key of the last configuration that was applied successfully.
pub const BACKUP_BRIDGES_KEY: &str = "tor.bridges.backup";

/// Tracks the selected bridge configuration and how to apply changes.
///
/// Holds two persisted snapshots. `current` is the configuration the daemon
/// should be using; a cold start always bakes it into the argument list.
/// `backup` is the last configuration known to have been applied and is
/// what [`rollback`](Self::rollback) restores.
///
/// A change is either applied cold (stop, then start with the new
/// `current`) or live over the control channel with
/// [`apply_live`](Self::apply_live). Either way, [`commit`](Self::commit)
/// records the success.
pub struct BridgeReconfigurator {
    store: Arc<dyn SettingsStore>,
    current: BridgesConfiguration,
    backup: BridgesConfiguration,
    needs_reconfiguration: bool,
}

impl BridgeReconfigurator {
    /// Loads both snapshots from the store.
    ///
    /// A missing `current` defaults to a direct connection, a missing
    /// `backup` to `current`. Undecodable values are logged and replaced by
    /// those defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the store itself fails.
    pub fn load(store: Arc<dyn SettingsStore>) -> StoreResult<Self> {
        let current = read(store.as_ref(), CURRENT_BRIDGES_KEY)?.unwrap_or_default();
        let backup = read(store.as_ref(), BACKUP_BRIDGES_KEY)?.unwrap_or_else(|| current.clone());
        Ok(Self {
            store,
            current,
            backup,
            needs_reconfiguration: false,
        })
    }

    /// Decides whether moving from `previous` to `next` requires the daemon
    /// to be reconfigured.
    ///
    /// Symmetric: swapping the arguments never changes the answer.
    #[must_use]
    pub fn evaluate(previous: &BridgesConfiguration, next: &BridgesConfiguration) -> bool {
        if previous.bridges_type != next.bridges_type {
            return true;
        }
        match (&previous.custom_bridges, &next.custom_bridges) {
            (Some(_), None) | (None, Some(_)) => true,
            (Some(before), Some(after)) => before != after,
            (None, None) => false,
        }
    }

    /// The configuration the daemon should be using.
    #[must_use]
    pub const fn current(&self) -> &BridgesConfiguration {
        &self.current
    }

    /// The last configuration applied successfully.
    #[must_use]
    pub const fn backup(&self) -> &BridgesConfiguration {
        &self.backup
    }

    /// Returns true if a staged change has not been applied yet.
    #[must_use]
    pub const fn needs_reconfiguration(&self) -> bool {
        self.needs_reconfiguration
    }

    /// Selects `next` as the current configuration.
    ///
    /// Returns whether the daemon needs reconfiguring. When it does, `next`
    /// is persisted as `current` right away so a cold start picks it up.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails; the in-memory state is then
    /// left unchanged.
    pub fn stage(&mut self, next: BridgesConfiguration) -> StoreResult<bool> {
        if !Self::evaluate(&self.current, &next) {
            return Ok(self.needs_reconfiguration);
        }
        write(self.store.as_ref(), CURRENT_BRIDGES_KEY, &next)?;
        self.current = next;
        self.needs_reconfiguration = true;
        Ok(true)
    }

    /// Records that `current` has been applied: both snapshots now hold it.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn commit(&mut self) -> StoreResult<()> {
        write(self.store.as_ref(), BACKUP_BRIDGES_KEY, &self.current)?;
        write(self.store.as_ref(), CURRENT_BRIDGES_KEY, &self.current)?;
        self.backup = self.current.clone();
        self.needs_reconfiguration = false;
        Ok(())
    }

    /// Restores `current` from `backup` after a failed application.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn rollback(&mut self) -> StoreResult<()> {
        write(self.store.as_ref(), CURRENT_BRIDGES_KEY, &self.backup)?;
        self.current = self.backup.clone();
        self.needs_reconfiguration = false;
        Ok(())
    }

    /// Pushes `current` to a running daemon without restarting it.
    ///
    /// Does nothing unless a staged change is pending. Bridges are disabled
    /// before the old lines are cleared, and re-enabled only after the new
    /// lines are in place, so the daemon never sees `UseBridges` without
    /// any bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if a control command fails or the snapshots cannot
    /// be persisted. The change stays pending in that case.
    pub async fn apply_live(&mut self, channel: &ControlChannel) -> TorResult<()> {
        if !self.needs_reconfiguration {
            return Ok(());
        }

        let lines: Vec<String> = self
            .current
            .active_lines()
            .into_iter()
            .map(str::to_string)
            .collect();

        channel.set_config("UseBridges", "0").await?;
        channel.reset_config("Bridge").await?;
        if !lines.is_empty() {
            let pairs: Vec<(&str, &str)> =
                lines.iter().map(|line| ("Bridge", line.as_str())).collect();
            channel.set_config_many(&pairs).await?;
            channel.set_config("UseBridges", "1").await?;
        }

        self.commit()?;
        info!(bridges = lines.len(), "Applied bridge configuration without restart");
        Ok(())
    }
}

impl std::fmt::Debug for BridgeReconfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeReconfigurator")
            .field("current", &self.current)
            .field("backup", &self.backup)
            .field("needs_reconfiguration", &self.needs_reconfiguration)
            .finish_non_exhaustive()
    }
}

fn read(store: &dyn SettingsStore, key: &str) -> StoreResult<Option<BridgesConfiguration>> {
    let Some(bytes) = store.retrieve(key)? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(config) => Ok(Some(config)),
        Err(e) => {
            warn!(key, error = %e, "Ignoring undecodable bridge configuration");
            Ok(None)
        }
    }
}

fn write(store: &dyn SettingsStore, key: &str, config: &BridgesConfiguration) -> StoreResult<()> {
    let bytes = serde_json::to_vec(config).map_err(|e| StoreError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.store(key, &bytes)
}
