//! Control channel to the embedded Tor daemon.
//!
//! The daemon exposes a line-based command protocol on a loopback port.
//! This module authenticates with the cookie the daemon writes at startup,
//! sends configuration commands, and routes asynchronous events to
//! registered observers.
//!
//! # Architecture
//!
//! ```text
//! ControlChannel
//!     ├── writer half  ── commands (serialized, one reply each)
//!     └── reader task  ── ReplyParser
//!             ├── 2xx/5xx replies ──> waiting command
//!             └── 6xx events ───────> ObserverRegistry
//! ```
//!
//! # Security
//!
//! - The channel only ever connects to `127.0.0.1`
//! - Cookie bytes are zeroized on drop and never logged

mod channel;
mod cookie;
mod error;
mod observer;
pub mod protocol;

pub use channel::ControlChannel;
pub use cookie::{AuthenticationCookie, COOKIE_FILE_NAME};
pub use error::{ControlError, ControlResult};
pub use observer::{ObserverFlow, ObserverRegistry, SubscriptionHandle};
pub use protocol::{ControlEvent, Reply, ReplyParser};
