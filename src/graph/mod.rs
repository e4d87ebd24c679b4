//! Object graph exposed over a session.
//!
//! Objects publish an explicit table of members (data, nested objects,
//! methods). Remote callers address them with dotted paths such as
//! `a.counter.increment`; nothing outside those tables is reachable.

mod args;
mod namespace;
mod object;
mod resolver;

pub use args::CallArgs;
pub use namespace::Namespace;
pub use object::{InvokeError, Member, Method, RemoteObject};
pub use resolver::{render, PathResolver};
