//! TCP transport module.
//!
//! Handles listening, dialing and the per-connection handshake.

mod connection;
mod dial;
mod listener;

pub use connection::Connection;
pub use dial::{dial, DialOptions};
pub use listener::{AcceptOptions, ConnectionMetrics, Listener};

/// Handshake reply granting the connection.
pub const HANDSHAKE_ACCEPT: &[u8] = b"yes";
/// Handshake reply refusing the connection.
pub const HANDSHAKE_REJECT: &[u8] = b"no";
