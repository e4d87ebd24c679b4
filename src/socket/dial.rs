//! Outbound connections with the dialing half of the handshake.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::{load_secret, Credential, HmacResponder};
use crate::config::Settings;
use crate::error::{AuthErrorKind, RpcError};
use crate::protocol::{Expect, MessageValue, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};

use super::{Connection, HANDSHAKE_ACCEPT, HANDSHAKE_REJECT};

/// Options for [`dial`].
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Credential presented to the acceptor.
    pub credential: Option<Credential>,
    /// Bound on connecting and on the handshake reply.
    pub timeout: Duration,
    /// Chunk size for the connection.
    pub chunk_size: usize,
    /// Maximum message size for the connection.
    pub max_message_size: usize,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            credential: None,
            timeout: Duration::from_secs(10),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl DialOptions {
    /// Build options from settings, loading the HMAC key if configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, RpcError> {
        let timeout = Duration::from_secs(settings.client.dial_timeout_seconds);
        let credential = match (&settings.handshake.secret, &settings.handshake.hmac_secret_path) {
            (Some(secret), _) => Some(Credential::fixed(secret.as_str())),
            (None, Some(path)) => {
                let key = load_secret(path)?;
                Some(Credential::custom(HmacResponder::new(&key, timeout)))
            }
            (None, None) => None,
        };

        Ok(Self {
            credential,
            timeout,
            chunk_size: settings.protocol.chunk_size,
            max_message_size: settings.protocol.max_message_size,
        })
    }

    /// Present `credential` during the handshake.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Bound connecting and the handshake reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use `chunk_size` on the connection.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Connect to `host:port`, run the handshake and build a session.
///
/// A `no` reply fails with [`AuthErrorKind::Rejected`]; any other reply
/// is a protocol violation. The socket is shut down on every failure.
pub async fn dial<S, F>(host: &str, port: u16, options: &DialOptions, factory: F) -> Result<S, RpcError>
where
    F: FnOnce(Connection) -> S,
{
    let stream = timeout(options.timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| RpcError::timeout())?
        .map_err(|e| RpcError::Socket {
            message: format!("Failed to connect to {}:{}: {}", host, port, e),
        })?;

    let mut conn = Connection::new(stream, options.chunk_size, options.max_message_size)?;
    debug!(peer = %conn.peer_addr(), "Connected");

    match handshake(&mut conn, options).await {
        Ok(()) => {
            info!(peer = %conn.peer_addr(), "Handshake accepted");
            Ok(factory(conn))
        }
        Err(e) => {
            warn!(peer = %conn.peer_addr(), error = %e, "Handshake failed");
            if let Err(shutdown_err) = conn.shutdown().await {
                debug!(error = %shutdown_err, "Failed to shut down connection");
            }
            Err(e)
        }
    }
}

async fn handshake(conn: &mut Connection, options: &DialOptions) -> Result<(), RpcError> {
    if let Some(credential) = &options.credential {
        credential.present(conn).await?;
    }

    match conn.recv(Expect::Raw, Some(options.timeout)).await? {
        MessageValue::Bytes(reply) if reply == HANDSHAKE_ACCEPT => Ok(()),
        MessageValue::Bytes(reply) if reply == HANDSHAKE_REJECT => Err(RpcError::Auth {
            kind: AuthErrorKind::Rejected,
        }),
        other => Err(RpcError::violation(format!(
            "unexpected handshake reply ({})",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::socket::{AcceptOptions, Listener};

    #[test]
    fn test_options_from_settings() {
        let settings = Settings::parse(
            r#"
[handshake]
secret = "secret"

[client]
dial_timeout_seconds = 3
"#,
        )
        .unwrap();
        let options = DialOptions::from_settings(&settings).unwrap();
        assert!(matches!(options.credential, Some(Credential::Fixed(MessageValue::Text(ref s))) if s == "secret"));
        assert_eq!(options.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_dial_refused_port() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.unwrap();
        let port = listener.local_addr().port();
        drop(listener);

        let err = dial("127.0.0.1", port, &DialOptions::default(), |conn| conn)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Socket { .. }));
    }

    #[tokio::test]
    async fn test_predicate_accepts() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.unwrap();
        let port = listener.local_addr().port();

        let server = tokio::spawn(async move {
            let options = AcceptOptions::default()
                .with_authenticator(Authenticator::predicate(|value| value.as_text().is_some()))
                .with_total_timeout(Duration::from_secs(5));
            listener.accept(|conn| conn.peer_addr(), &options).await.unwrap()
        });

        let options = DialOptions::default().with_credential(Credential::fixed("anything"));
        let conn = dial("127.0.0.1", port, &options, |conn| conn).await.unwrap();
        assert_eq!(conn.peer_addr().port(), port);
        assert!(server.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_violation() {
        let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = raw.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = raw.accept().await.unwrap();
            let mut conn =
                Connection::new(stream, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
            conn.send(&MessageValue::Text("maybe".into())).await.unwrap();
            // Hold the socket until the dialer hangs up.
            let _ = conn.recv(Expect::Any, Some(Duration::from_secs(5))).await;
        });

        let err = dial("127.0.0.1", port, &DialOptions::default(), |conn| conn)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Protocol { .. }));
        server.await.unwrap();
    }
}
