//! HMAC-SHA256 challenge-response handshake.
//!
//! The acceptor sends a random nonce as text, the dialer answers with the
//! hex-encoded HMAC of that nonce under the shared secret.

use std::path::Path;
use std::time::Duration;

use ring::hmac;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AuthErrorKind, RpcError};
use crate::protocol::{Expect, MessageValue};
use crate::socket::Connection;

use super::authenticator::{BoxFuture, ConnectionResponder, ConnectionValidator};

/// Load a shared secret from a file.
///
/// Refuses files readable by group or others.
pub fn load_secret(path: &Path) -> Result<Vec<u8>, RpcError> {
    let metadata = std::fs::metadata(path).map_err(|e| secret_error(format!(
        "Failed to read secret metadata from {}: {}",
        path.display(),
        e
    )))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(secret_error(format!(
                "Secret file {} has insecure permissions {:04o}, expected 0600 or 0400",
                path.display(),
                mode & 0o777
            )));
        }
    }

    let secret = std::fs::read(path).map_err(|e| {
        secret_error(format!("Failed to read secret from {}: {}", path.display(), e))
    })?;
    if secret.is_empty() {
        return Err(secret_error(format!("Secret file {} is empty", path.display())));
    }
    Ok(secret)
}

fn secret_error(message: String) -> RpcError {
    RpcError::Auth {
        kind: AuthErrorKind::SecretError { message },
    }
}

/// Accept-side HMAC validator.
pub struct HmacChallenger {
    key: hmac::Key,
    timeout: Duration,
}

impl HmacChallenger {
    /// Create a challenger; `timeout` bounds the wait for the response.
    pub fn new(secret: &[u8], timeout: Duration) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            timeout,
        }
    }

    fn verify(&self, nonce: &str, response: &MessageValue) -> bool {
        let Some(signature) = response.as_text().and_then(|text| hex::decode(text).ok()) else {
            return false;
        };
        hmac::verify(&self.key, nonce.as_bytes(), &signature).is_ok()
    }
}

impl ConnectionValidator for HmacChallenger {
    fn validate<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Result<bool, RpcError>> {
        Box::pin(async move {
            let nonce = Uuid::new_v4().simple().to_string();
            conn.send(&MessageValue::Text(nonce.clone())).await?;

            let response = conn.recv(Expect::Raw, Some(self.timeout)).await?;
            let valid = self.verify(&nonce, &response);
            if valid {
                debug!(peer = %conn.peer_addr(), "HMAC challenge passed");
            } else {
                warn!(peer = %conn.peer_addr(), "HMAC challenge failed");
            }
            Ok(valid)
        })
    }
}

/// Dial-side HMAC responder.
pub struct HmacResponder {
    key: hmac::Key,
    timeout: Duration,
}

impl HmacResponder {
    /// Create a responder; `timeout` bounds the wait for the challenge.
    pub fn new(secret: &[u8], timeout: Duration) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            timeout,
        }
    }

    fn sign(&self, nonce: &str) -> String {
        hex::encode(hmac::sign(&self.key, nonce.as_bytes()).as_ref())
    }
}

impl ConnectionResponder for HmacResponder {
    fn respond<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Result<(), RpcError>> {
        Box::pin(async move {
            let challenge = conn.recv(Expect::Raw, Some(self.timeout)).await?;
            let nonce = challenge.as_text().ok_or_else(|| {
                RpcError::violation(format!("expected a text challenge, got {}", challenge.kind()))
            })?;
            let signature = self.sign(nonce);
            conn.send(&MessageValue::Text(signature)).await
        })
    }
}
