//! Key-value persistence for user preferences.
//!
//! The controller persists the selected bridge configuration through the
//! [`SettingsStore`] trait so that the platform layer can back it with
//! whatever preference storage it already has. [`JsonFileStore`] is a plain
//! file-backed implementation for hosts without one.

mod error;
mod file;
#[cfg(any(test, feature = "test-utils"))]
mod memory;

pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;

/// Trait for persisting small preference values.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the controller shares one store
/// between its operations.
///
/// # Example
///
/// ```ignore
/// use wallet_tor::store::{SettingsStore, StoreResult};
///
/// struct PlatformPreferences { /* ... */ }
///
/// impl SettingsStore for PlatformPreferences {
///     fn store(&self, key: &str, value: &[u8]) -> StoreResult<()> {
///         // Write to the platform preference store
///         Ok(())
///     }
///     // ... other methods
/// }
/// ```
pub trait SettingsStore: Send + Sync {
    /// Stores bytes under the given key, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn store(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Retrieves the bytes stored under the given key.
    ///
    /// Returns `Ok(None)` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the retrieval operation fails.
    fn retrieve(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Deletes the value for the given key. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete(&self, key: &str) -> StoreResult<()>;
}
