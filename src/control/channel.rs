//! Loopback control connection to the daemon.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use super::cookie::AuthenticationCookie;
use super::error::{ControlError, ControlResult};
use super::observer::{ObserverFlow, ObserverRegistry, SubscriptionHandle};
use super::protocol::{reset_config_command, set_config_command, ControlEvent, Reply, ReplyParser};

/// Control channel to a running daemon.
///
/// Commands are strictly request/response and are serialized by an internal
/// lock. Asynchronous events are read on a background task and handed to the
/// [`ObserverRegistry`].
///
/// Everything except [`connect`](Self::connect),
/// [`authenticate`](Self::authenticate) and
/// [`disconnect`](Self::disconnect) needs an authenticated connection.
/// Calling those operations early is a caller bug; they return
/// [`ControlError::NotConnected`] or [`ControlError::NotAuthenticated`] in
/// every build profile instead of panicking.
///
/// Dropping a command future after its line was written is safe: the late
/// reply is discarded before the next command is sent. Dropping it while
/// the line is only partly written leaves the connection unusable; callers
/// should [`disconnect`](Self::disconnect) in that case.
///
/// # Example
///
/// ```rust,ignore
/// use wallet_tor::control::{AuthenticationCookie, ControlChannel};
///
/// let channel = ControlChannel::new("127.0.0.1:39060".parse()?);
/// channel.connect().await?;
/// channel.authenticate(&AuthenticationCookie::read_from(&cookie_path)?).await?;
/// channel.set_config("DisableNetwork", "0").await?;
/// ```
pub struct ControlChannel {
    address: SocketAddr,
    connection: Mutex<Option<Connection>>,
    observers: Arc<ObserverRegistry>,
    authenticated: watch::Sender<bool>,
}

struct Connection {
    writer: OwnedWriteHalf,
    replies: mpsc::UnboundedReceiver<ControlResult<Reply>>,
    reader: JoinHandle<()>,
    /// Commands written whose reply has not been read yet.
    unclaimed: usize,
}

impl ControlChannel {
    /// Creates a disconnected channel for the given control port address.
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        let (authenticated, _) = watch::channel(false);
        Self {
            address,
            connection: Mutex::new(None),
            observers: Arc::new(ObserverRegistry::new()),
            authenticated,
        }
    }

    /// The control port address.
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    /// Opens the TCP connection. Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Connect`] if the port cannot be reached.
    pub async fn connect(&self) -> ControlResult<()> {
        let mut connection = self.connection.lock().await;
        if connection
            .as_ref()
            .is_some_and(|existing| !existing.reader.is_finished())
        {
            return Ok(());
        }

        let stream = TcpStream::connect(self.address)
            .await
            .map_err(|e| ControlError::Connect {
                address: self.address.to_string(),
                reason: e.to_string(),
            })?;
        let (read, writer) = stream.into_split();
        let (replies_tx, replies) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_replies(read, replies_tx, Arc::clone(&self.observers)));

        if let Some(stale) = connection.replace(Connection {
            writer,
            replies,
            reader,
            unclaimed: 0,
        }) {
            stale.reader.abort();
            self.authenticated.send_replace(false);
        }
        drop(connection);

        debug!(address = %self.address, "Control channel connected");
        Ok(())
    }

    /// Returns true if a connection is open.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|connection| !connection.reader.is_finished())
    }

    /// Returns true once authentication succeeded on the current connection.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    /// Signal that flips to `true` exactly once per connection, when
    /// authentication succeeds.
    #[must_use]
    pub fn authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// Performs cookie authentication.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotConnected`] without a connection, or
    /// [`ControlError::Rejected`] if the daemon refuses the cookie.
    pub async fn authenticate(&self, cookie: &AuthenticationCookie) -> ControlResult<()> {
        let command = Zeroizing::new(format!("AUTHENTICATE {}", cookie.to_hex().as_str()));
        self.send(&command).await?.into_result()?;

        let first = self.authenticated.send_if_modified(|authenticated| {
            let changed = !*authenticated;
            *authenticated = true;
            changed
        });
        if first {
            info!(address = %self.address, "Control channel authenticated");
        }
        Ok(())
    }

    /// Sets one configuration option.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not authenticated or the daemon
    /// rejects the value.
    pub async fn set_config(&self, key: &str, value: &str) -> ControlResult<()> {
        self.set_config_many(&[(key, value)]).await
    }

    /// Sets several options in one `SETCONF`. Repeating a key assigns a list,
    /// which is how multiple `Bridge` lines are applied together.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not authenticated or the daemon
    /// rejects a value.
    pub async fn set_config_many(&self, pairs: &[(&str, &str)]) -> ControlResult<()> {
        debug!(keys = ?pairs.iter().map(|(key, _)| *key).collect::<Vec<_>>(), "SETCONF");
        self.command(&set_config_command(pairs)).await.map(drop)
    }

    /// Resets an option to its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not authenticated or the daemon
    /// rejects the key.
    pub async fn reset_config(&self, key: &str) -> ControlResult<()> {
        debug!(key, "RESETCONF");
        self.command(&reset_config_command(key)).await.map(drop)
    }

    /// Subscribes the connection to the given asynchronous event kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not authenticated or the daemon
    /// does not know an event kind.
    pub async fn set_events(&self, kinds: &[&str]) -> ControlResult<()> {
        let command = std::iter::once("SETEVENTS")
            .chain(kinds.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.command(&command).await.map(drop)
    }

    /// Queries a single `GETINFO` key.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not authenticated or the daemon
    /// rejects the key.
    pub async fn get_info(&self, key: &str) -> ControlResult<Option<String>> {
        let reply = self.command(&format!("GETINFO {key}")).await?;
        Ok(reply.values().remove(key))
    }

    /// Registers an event observer.
    ///
    /// The handler runs once per matching event on the reader task and may
    /// return [`ObserverFlow::Done`] to unregister itself.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotAuthenticated`] before authentication.
    pub fn observe<P, H>(&self, predicate: P, handler: H) -> ControlResult<SubscriptionHandle>
    where
        P: Fn(&ControlEvent) -> bool + Send + 'static,
        H: FnMut(&ControlEvent) -> ObserverFlow + Send + 'static,
    {
        if !self.is_authenticated() {
            return Err(ControlError::NotAuthenticated);
        }
        Ok(self.observers.register(predicate, handler))
    }

    /// Removes an observer. Returns false if it was already removed.
    pub fn unobserve(&self, handle: SubscriptionHandle) -> bool {
        self.observers.unregister(handle)
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Closes the connection and drops every observer.
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        self.observers.clear();
        self.authenticated.send_replace(false);

        if let Some(mut connection) = connection {
            if let Err(e) = connection.writer.shutdown().await {
                trace!(error = %e, "Control connection shutdown failed");
            }
            connection.reader.abort();
            let _ = connection.reader.await;
            debug!(address = %self.address, "Control channel disconnected");
        }
    }

    async fn command(&self, line: &str) -> ControlResult<Reply> {
        if !self.is_authenticated() {
            return Err(ControlError::NotAuthenticated);
        }
        self.send(line).await?.into_result()
    }

    async fn send(&self, line: &str) -> ControlResult<Reply> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(ControlError::NotConnected)?;

        // A command whose caller stopped waiting still gets its reply; it
        // must be consumed before the next command is written.
        while connection.unclaimed > 0 {
            let stale = connection.replies.recv().await.ok_or(ControlError::Closed)?;
            connection.unclaimed -= 1;
            debug!(reply = ?stale, "Discarding unclaimed control reply");
        }

        let io = |e: std::io::Error| ControlError::Io(e.to_string());
        connection.writer.write_all(line.as_bytes()).await.map_err(io)?;
        connection.writer.write_all(b"\r\n").await.map_err(io)?;
        connection.unclaimed += 1;
        connection.writer.flush().await.map_err(io)?;

        let reply = connection.replies.recv().await.ok_or(ControlError::Closed)?;
        connection.unclaimed -= 1;
        reply
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("address", &self.address)
            .field("authenticated", &self.is_authenticated())
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

async fn read_replies(
    read: OwnedReadHalf,
    replies: mpsc::UnboundedSender<ControlResult<Reply>>,
    observers: Arc<ObserverRegistry>,
) {
    let mut lines = BufReader::new(read).lines();
    let mut parser = ReplyParser::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Control connection closed by the daemon");
                break;
            }
            Err(e) => {
                let _ = replies.send(Err(ControlError::Io(e.to_string())));
                break;
            }
        };

        match parser.push(&line) {
            Ok(Some(reply)) if reply.is_async() => match ControlEvent::from_reply(&reply) {
                Ok(event) => {
                    let invoked = observers.dispatch(&event);
                    trace!(kind = event.kind(), invoked, "Dispatched control event");
                }
                Err(e) => warn!(error = %e, "Ignoring malformed control event"),
            },
            Ok(Some(reply)) => {
                if replies.send(Ok(reply)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Malformed control reply");
                if replies.send(Err(e)).is_err() {
                    break;
                }
            }
        }
    }
}
