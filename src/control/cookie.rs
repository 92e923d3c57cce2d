//! Cookie authentication secret.

use std::fmt;
use std::path::Path;

use zeroize::Zeroizing;

use crate::error::{TorError, TorResult};

/// File name of the cookie the daemon writes into its data directory.
pub const COOKIE_FILE_NAME: &str = "control_auth_cookie";

/// The shared secret the daemon writes at startup.
///
/// The bytes are wiped from memory when the cookie is dropped and never
/// appear in `Debug` output.
#[derive(Clone)]
pub struct AuthenticationCookie {
    bytes: Zeroizing<Vec<u8>>,
}

impl AuthenticationCookie {
    /// Wraps raw cookie bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Reads the cookie file.
    ///
    /// # Errors
    ///
    /// Returns [`TorError::MissingCookie`] if the file is absent, unreadable,
    /// or empty.
    pub fn read_from(path: &Path) -> TorResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| TorError::MissingCookie(format!("{}: {e}", path.display())))?;
        if bytes.is_empty() {
            return Err(TorError::MissingCookie(format!(
                "{}: cookie file is empty",
                path.display()
            )));
        }
        Ok(Self::from_bytes(bytes))
    }

    /// Hex encoding used by the `AUTHENTICATE` command.
    #[must_use]
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes.as_slice()))
    }

    /// Number of bytes in the cookie.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the cookie holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for AuthenticationCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationCookie")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
