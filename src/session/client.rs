//! Client-role session.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::RpcError;
use crate::protocol::Envelope;
use crate::socket::{dial, Connection, DialOptions};

use super::proxy::RemoteRef;

const NAME_NOT_FOUND_PREFIX: &str = "NameNotFound:";

/// A connection driving the peer's object graph.
///
/// Calls are strictly request/response: concurrent callers queue on an
/// internal lock, one outstanding call at a time. Dropping the session
/// sends `_stop` to the peer on a best-effort basis.
pub struct ClientSession {
    peer: SocketAddr,
    conn: Mutex<Option<Connection>>,
    call_timeout: Option<Duration>,
}

impl ClientSession {
    /// Wrap an authenticated connection. Replies are awaited indefinitely.
    pub fn new(conn: Connection) -> Self {
        Self::with_call_timeout(conn, None)
    }

    /// Wrap an authenticated connection, bounding each reply wait.
    pub fn with_call_timeout(conn: Connection, call_timeout: Option<Duration>) -> Self {
        Self {
            peer: conn.peer_addr(),
            conn: Mutex::new(Some(conn)),
            call_timeout,
        }
    }

    /// Dial `host:port` and wrap the connection.
    pub async fn connect(host: &str, port: u16, options: &DialOptions) -> Result<Self, RpcError> {
        dial(host, port, options, Self::new).await
    }

    /// Dial using the `[client]`, `[handshake]` and `[protocol]` settings.
    pub async fn connect_with_settings(host: &str, port: u16, settings: &Settings) -> Result<Self, RpcError> {
        let options = DialOptions::from_settings(settings)?;
        let call_timeout = settings.client.call_timeout();
        dial(host, port, &options, |conn| Self::with_call_timeout(conn, call_timeout)).await
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the connection is still usable.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Handle for the peer's root object.
    pub fn root(&self) -> RemoteRef<'_> {
        RemoteRef::new(self, String::new())
    }

    /// Unchecked handle for `path`; a missing member surfaces on use.
    pub fn path(&self, path: &str) -> RemoteRef<'_> {
        RemoteRef::new(self, path.to_string())
    }

    /// Checked handle for `path`.
    pub async fn attr(&self, path: &str) -> Result<RemoteRef<'_>, RpcError> {
        self.require(path).await?;
        Ok(self.path(path))
    }

    /// Invoke the member at `path`.
    pub async fn call(&self, path: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, RpcError> {
        self.request(Envelope::call(path, args, kwargs)).await
    }

    /// Whether `path` exists on the peer.
    pub async fn exists(&self, path: &str) -> Result<bool, RpcError> {
        match self.require(path).await {
            Ok(()) => Ok(true),
            Err(RpcError::NameNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// String form of the member at `path`.
    pub async fn get_attr_str(&self, path: &str) -> Result<String, RpcError> {
        match self.request(Envelope::get_attr_str(path)).await? {
            Value::String(text) => Ok(text),
            other => Err(RpcError::violation(format!(
                "'get_attr_str' returned a non-string value: {}",
                other
            ))),
        }
    }

    /// Assign `value` to the member at `path`.
    pub async fn set_attr(&self, path: &str, value: Value) -> Result<(), RpcError> {
        self.request(Envelope::set_attr(path, value)).await.map(|_| ())
    }

    /// Remove the member at `path`.
    pub async fn del_attr(&self, path: &str) -> Result<(), RpcError> {
        self.request(Envelope::del_attr(path)).await.map(|_| ())
    }

    /// Send `_stop` to the peer and close the connection.
    ///
    /// Later calls fail with a session error. Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<(), RpcError> {
        let Some(mut conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        info!(peer = %self.peer, "Stopping remote session");
        let sent = conn.send_envelope(&Envelope::stop()).await;
        if let Err(e) = conn.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Failed to shut down connection");
        }
        sent
    }

    async fn require(&self, path: &str) -> Result<(), RpcError> {
        match self.request(Envelope::exist_attr(path)).await {
            Ok(_) => Ok(()),
            Err(RpcError::RemoteFailure { message }) if message.starts_with(NAME_NOT_FOUND_PREFIX) => {
                Err(RpcError::NameNotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Send one request and wait for its reply.
    ///
    /// A transport failure (including a reply timeout) closes the
    /// session, since a late reply would pair with the next request.
    /// The connection is out of its slot while the call is in flight,
    /// so cancelling the returned future drops it and closes the session.
    pub(crate) async fn request(&self, envelope: Envelope) -> Result<Value, RpcError> {
        let mut guard = self.conn.lock().await;
        let mut conn = guard.take().ok_or_else(|| RpcError::Session {
            message: format!("session with {} is closed", self.peer),
        })?;

        debug!(peer = %self.peer, verb = %envelope.verb, "Sending request");
        let exchanged = match conn.send_envelope(&envelope).await {
            Ok(()) => conn.recv_envelope(self.call_timeout).await,
            Err(e) => Err(e),
        };

        match exchanged {
            Ok(reply) => {
                *guard = Some(conn);
                reply.into_result()
            }
            Err(e) => {
                warn!(peer = %self.peer, verb = %envelope.verb, error = %e, "Request failed, closing session");
                if let Err(shutdown_err) = conn.shutdown().await {
                    debug!(error = %shutdown_err, "Failed to shut down connection");
                }
                Err(e)
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            match Envelope::stop().to_message() {
                Ok(message) => {
                    if let Err(e) = conn.try_send_now(&message) {
                        debug!(peer = %self.peer, error = %e, "Could not send stop on drop");
                    }
                }
                Err(e) => debug!(error = %e, "Could not encode stop"),
            }
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("peer", &self.peer)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
