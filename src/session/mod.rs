//! Sessions: one authenticated connection in a server or client role.
//!
//! A [`ServerSession`] runs the dispatch loop over an object graph. A
//! [`ClientSession`] issues calls to the peer's graph through
//! [`RemoteRef`] handles. Either role can sit on either end of the
//! handshake.

mod client;
mod proxy;
mod server;

pub use client::ClientSession;
pub use proxy::RemoteRef;
pub use server::{ServerSession, SessionOptions, StopHandle, StopHook};

use std::fmt;

/// Lifecycle of a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, worker not launched.
    Idle,
    /// Dispatch loop running.
    Running,
    /// Stop requested, worker finishing.
    Stopping,
    /// Worker exited and the socket is closed.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
