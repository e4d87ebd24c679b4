//! Authentication module.
//!
//! Handshake policies for accepting and dialing, and an HMAC
//! challenge-response pair built on them.

mod authenticator;
mod hmac;

pub use authenticator::{
    Authenticator, BoxFuture, ConnectionResponder, ConnectionValidator, Credential,
};
pub use hmac::{load_secret, HmacChallenger, HmacResponder};
