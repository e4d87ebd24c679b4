//! Handshake policies for both ends of a connection.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::RpcError;
use crate::protocol::{Expect, MessageValue};
use crate::socket::Connection;

/// Boxed future returned by the handshake traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Accept-side validator that runs its own exchange on the raw connection.
///
/// Returns `Ok(true)` to accept the peer. The listener sends the final
/// `yes`/`no` reply itself.
pub trait ConnectionValidator: Send + Sync {
    fn validate<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Result<bool, RpcError>>;
}

/// Dial-side counterpart of [`ConnectionValidator`].
pub trait ConnectionResponder: Send + Sync {
    fn respond<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Result<(), RpcError>>;
}

type Predicate = dyn Fn(&MessageValue) -> bool + Send + Sync;

/// How the accepting side decides whether to keep a connection.
#[derive(Clone)]
pub enum Authenticator {
    /// The peer's first message must equal this value.
    Secret(MessageValue),
    /// Predicate over the peer's first message.
    Predicate(Arc<Predicate>),
    /// Custom multi-round exchange.
    Validator(Arc<dyn ConnectionValidator>),
}

impl Authenticator {
    /// Expect a fixed value.
    pub fn secret(value: impl Into<MessageValue>) -> Self {
        Self::Secret(value.into())
    }

    /// Accept when `f` returns true for the peer's first message.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&MessageValue) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Hand the raw connection to `validator`.
    pub fn validator(validator: impl ConnectionValidator + 'static) -> Self {
        Self::Validator(Arc::new(validator))
    }

    /// Whether the authenticator consumes a single received value.
    pub fn is_value_based(&self) -> bool {
        !matches!(self, Self::Validator(_))
    }

    /// Kind of credential message to wait for.
    pub fn expects(&self) -> Expect {
        match self {
            Self::Secret(MessageValue::Json(_)) => Expect::Json,
            Self::Secret(_) | Self::Validator(_) => Expect::Raw,
            Self::Predicate(_) => Expect::Any,
        }
    }

    /// Evaluate a received value. Validators never match a value.
    pub fn check(&self, value: &MessageValue) -> bool {
        match self {
            Self::Secret(expected) => expected == value,
            Self::Predicate(predicate) => predicate(value),
            Self::Validator(_) => false,
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret itself.
        let name = match self {
            Self::Secret(_) => "Secret",
            Self::Predicate(_) => "Predicate",
            Self::Validator(_) => "Validator",
        };
        f.debug_tuple("Authenticator").field(&name).finish()
    }
}

type Generator = dyn Fn() -> MessageValue + Send + Sync;

/// What the dialing side presents during the handshake.
#[derive(Clone)]
pub enum Credential {
    /// Send a fixed value.
    Fixed(MessageValue),
    /// Compute the value for each connection.
    Computed(Arc<Generator>),
    /// Run a custom exchange.
    Custom(Arc<dyn ConnectionResponder>),
}

impl Credential {
    /// Send a fixed value.
    pub fn fixed(value: impl Into<MessageValue>) -> Self {
        Self::Fixed(value.into())
    }

    /// Send the result of `f`, evaluated once per dial.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> MessageValue + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// Let `responder` drive the exchange.
    pub fn custom(responder: impl ConnectionResponder + 'static) -> Self {
        Self::Custom(Arc::new(responder))
    }

    /// Present the credential on `conn`.
    pub async fn present(&self, conn: &mut Connection) -> Result<(), RpcError> {
        match self {
            Self::Fixed(value) => conn.send(value).await,
            Self::Computed(generate) => {
                let value = generate();
                conn.send(&value).await
            }
            Self::Custom(responder) => responder.respond(conn).await,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fixed(_) => "Fixed",
            Self::Computed(_) => "Computed",
            Self::Custom(_) => "Custom",
        };
        f.debug_tuple("Credential").field(&name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches_exact_value() {
        let auth = Authenticator::secret("secret");
        assert!(auth.is_value_based());
        assert!(auth.check(&MessageValue::Text("secret".into())));
        assert!(!auth.check(&MessageValue::Text("wrong".into())));
        // Same bytes, different kind.
        assert!(!auth.check(&MessageValue::Bytes(b"secret".to_vec())));
    }

    #[test]
    fn test_predicate() {
        let auth = Authenticator::predicate(|value| {
            value.as_text().map(|t| t.starts_with("token-")).unwrap_or(false)
        });
        assert!(auth.check(&MessageValue::Text("token-42".into())));
        assert!(!auth.check(&MessageValue::Text("guest".into())));
        assert_eq!(auth.expects(), Expect::Any);
    }

    #[test]
    fn test_secret_kind_selects_expected_message() {
        assert_eq!(Authenticator::secret("secret").expects(), Expect::Raw);
        assert_eq!(Authenticator::secret(serde_json::json!({"token": 1})).expects(), Expect::Json);
    }

    #[test]
    fn test_debug_hides_secret() {
        let auth = Authenticator::secret("hunter2");
        assert!(!format!("{:?}", auth).contains("hunter2"));

        let credential = Credential::fixed("hunter2");
        assert!(!format!("{:?}", credential).contains("hunter2"));
    }
}
