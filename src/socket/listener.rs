//! TCP listener with the accepting half of the handshake.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::auth::{load_secret, Authenticator, HmacChallenger};
use crate::config::{ListenerConfig, Settings};
use crate::error::RpcError;
use crate::protocol::{Expect, MessageValue, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};

use super::{Connection, HANDSHAKE_ACCEPT, HANDSHAKE_REJECT};

/// Pause after a failed `accept(2)` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Connection metrics for monitoring.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Connections that passed the handshake.
    pub connections_accepted: AtomicU64,
    /// Connections refused or dropped during the handshake.
    pub connections_rejected: AtomicU64,
    /// Sessions currently being served.
    pub active_sessions: AtomicUsize,
}

impl ConnectionMetrics {
    /// Create new connection metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handshake outcome.
    pub fn record_handshake(&self, accepted: bool) {
        if accepted {
            self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Mark a session as being served.
    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a served session as finished.
    pub fn session_finished(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get accepted connection count.
    pub fn accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Get rejected connection count.
    pub fn rejected(&self) -> u64 {
        self.connections_rejected.load(Ordering::Relaxed)
    }

    /// Get active session count.
    pub fn active(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// Options for one [`Listener::accept`] call.
#[derive(Debug, Clone)]
pub struct AcceptOptions {
    /// Handshake policy; `None` accepts every connection.
    pub authenticator: Option<Authenticator>,
    /// Bound on receiving a value-based credential. Zero waits indefinitely.
    pub socket_timeout: Duration,
    /// Wall-clock budget of the whole call. `None` waits indefinitely.
    pub total_timeout: Option<Duration>,
    /// Chunk size for accepted connections.
    pub chunk_size: usize,
    /// Maximum message size for accepted connections.
    pub max_message_size: usize,
}

impl Default for AcceptOptions {
    fn default() -> Self {
        Self {
            authenticator: None,
            socket_timeout: Duration::from_secs(10),
            total_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl AcceptOptions {
    /// Build options from settings, loading the HMAC key if configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, RpcError> {
        let handshake = &settings.handshake;
        let socket_timeout = Duration::from_secs(handshake.socket_timeout_seconds);

        let authenticator = match (&handshake.secret, &handshake.hmac_secret_path) {
            (Some(secret), _) => Some(Authenticator::secret(secret.as_str())),
            (None, Some(path)) => {
                let key = load_secret(path)?;
                Some(Authenticator::validator(HmacChallenger::new(&key, socket_timeout)))
            }
            (None, None) => None,
        };

        let total_timeout = match handshake.accept_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            authenticator,
            socket_timeout,
            total_timeout,
            chunk_size: settings.protocol.chunk_size,
            max_message_size: settings.protocol.max_message_size,
        })
    }

    /// Require `authenticator` to pass.
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Give up after `total` with no successful connection.
    pub fn with_total_timeout(mut self, total: Duration) -> Self {
        self.total_timeout = Some(total);
        self
    }

    /// Bound the credential receive.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Use `chunk_size` on accepted connections.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn credential_timeout(&self) -> Option<Duration> {
        (!self.socket_timeout.is_zero()).then_some(self.socket_timeout)
    }
}

/// TCP listener handing authenticated connections to a session factory.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    metrics: Arc<ConnectionMetrics>,
}

impl Listener {
    /// Bind and listen with address reuse enabled.
    pub async fn bind(address: &str, port: u16, backlog: u32) -> Result<Self, RpcError> {
        let addr = lookup_host((address, port))
            .await
            .map_err(|e| RpcError::Socket {
                message: format!("Failed to resolve {}:{}: {}", address, port, e),
            })?
            .next()
            .ok_or_else(|| RpcError::Socket {
                message: format!("No address found for {}:{}", address, port),
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| RpcError::Socket {
            message: format!("Failed to create socket: {}", e),
        })?;

        socket.set_reuseaddr(true)?;
        socket.bind(addr).map_err(|e| RpcError::Socket {
            message: format!("Failed to bind to {}: {}", addr, e),
        })?;
        let listener = socket.listen(backlog).map_err(|e| RpcError::Socket {
            message: format!("Failed to listen on {}: {}", addr, e),
        })?;
        let local_addr = listener.local_addr()?;

        info!(address = %local_addr, backlog = backlog, "Listener bound");

        Ok(Self {
            listener,
            local_addr,
            metrics: Arc::new(ConnectionMetrics::new()),
        })
    }

    /// Bind using the `[listener]` settings.
    pub async fn bind_with_config(config: &ListenerConfig) -> Result<Self, RpcError> {
        Self::bind(&config.bind_address, config.port, config.backlog).await
    }

    /// Bound local address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get connection metrics.
    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept connections until one passes the handshake.
    ///
    /// Returns `Ok(None)` when the total timeout elapses first. Rejected
    /// connections are answered with `no`, shut down, and the loop keeps
    /// accepting within the same budget.
    pub async fn accept<S, F>(&self, factory: F, options: &AcceptOptions) -> Result<Option<S>, RpcError>
    where
        F: FnOnce(Connection) -> S,
    {
        let deadline = options.total_timeout.map(|total| Instant::now() + total);

        loop {
            let accepted = match deadline {
                Some(deadline) => match timeout_at(deadline, self.listener.accept()).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(address = %self.local_addr, "Accept timed out");
                        return Ok(None);
                    }
                },
                None => self.listener.accept().await,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    // Errors such as EMFILE persist; pause before retrying.
                    sleep_until(retry_at(Instant::now(), deadline)).await;
                    continue;
                }
            };

            let mut conn = match Connection::new(stream, options.chunk_size, options.max_message_size) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to set up connection");
                    continue;
                }
            };

            let handshake = match deadline {
                Some(deadline) => timeout_at(deadline, self.handshake(&mut conn, options))
                    .await
                    .unwrap_or_else(|_| Err(RpcError::timeout())),
                None => self.handshake(&mut conn, options).await,
            };

            match handshake {
                Ok(true) => {
                    self.metrics.record_handshake(true);
                    info!(peer = %peer, "Connection accepted");
                    return Ok(Some(factory(conn)));
                }
                Ok(false) => {
                    self.metrics.record_handshake(false);
                    warn!(peer = %peer, "Connection rejected");
                }
                Err(e) => {
                    self.metrics.record_handshake(false);
                    warn!(peer = %peer, error = %e, "Handshake failed");
                }
            }

            if let Err(e) = conn.shutdown().await {
                debug!(peer = %peer, error = %e, "Failed to shut down rejected connection");
            }
        }
    }

    async fn handshake(&self, conn: &mut Connection, options: &AcceptOptions) -> Result<bool, RpcError> {
        let accepted = match &options.authenticator {
            None => true,
            Some(Authenticator::Validator(validator)) => validator.validate(conn).await?,
            Some(authenticator) => {
                let credential = conn.recv(authenticator.expects(), options.credential_timeout()).await?;
                authenticator.check(&credential)
            }
        };

        let reply = if accepted { HANDSHAKE_ACCEPT } else { HANDSHAKE_REJECT };
        conn.send(&MessageValue::Bytes(reply.to_vec())).await?;
        Ok(accepted)
    }

    /// Wait for all served sessions to finish.
    ///
    /// Returns immediately if there are no active sessions.
    pub async fn wait_for_drain(&self) {
        let poll_interval = Duration::from_millis(100);

        while self.metrics.active() > 0 {
            debug!(active = self.metrics.active(), "Waiting for sessions to drain");
            tokio::time::sleep(poll_interval).await;
        }

        info!("All sessions drained");
    }
}

/// When to retry a failed accept, never past the accept deadline.
fn retry_at(now: Instant, deadline: Option<Instant>) -> Instant {
    let resume = now + ACCEPT_RETRY_DELAY;
    deadline.map_or(resume, |deadline| deadline.min(resume))
}
