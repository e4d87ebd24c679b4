//! graphcall
//!
//! Remote invocation over raw TCP: one process exposes an object graph,
//! another reads, writes and calls members of it by dotted path.
//!
//! ```ignore
//! // Serving side
//! let listener = Listener::bind("0.0.0.0", 10000, 5).await?;
//! let options = AcceptOptions::default().with_authenticator(Authenticator::secret("secret"));
//! if let Some(mut session) = listener
//!     .accept(|conn| ServerSession::new(conn, root), &options)
//!     .await?
//! {
//!     session.start()?;
//!     session.wait().await?;
//! }
//!
//! // Calling side
//! let options = DialOptions::default().with_credential(Credential::fixed("secret"));
//! let session = ClientSession::connect("127.0.0.1", 10000, &options).await?;
//! session.path("a.counter").path("increment").invoke().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod session;
pub mod socket;
