//! Lazy handles to remote paths.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::RpcError;

use super::client::ClientSession;

/// Address of a member on the peer's object graph.
///
/// A handle holds no remote state. Extending it builds a new handle;
/// invoking it performs one round trip and leaves it reusable.
#[derive(Clone)]
pub struct RemoteRef<'s> {
    session: &'s ClientSession,
    path: String,
}

impl<'s> RemoteRef<'s> {
    pub(crate) fn new(session: &'s ClientSession, path: String) -> Self {
        Self { session, path }
    }

    /// Dotted path this handle addresses (empty for the root).
    pub fn address(&self) -> &str {
        &self.path
    }

    /// Extend the path without contacting the peer.
    pub fn path(&self, name: &str) -> RemoteRef<'s> {
        RemoteRef::new(self.session, join_path(&self.path, name))
    }

    /// Extend the path, checking that the member exists.
    ///
    /// Fails with [`RpcError::NameNotFound`] if it does not.
    pub async fn attr(&self, name: &str) -> Result<RemoteRef<'s>, RpcError> {
        self.session.attr(&join_path(&self.path, name)).await
    }

    /// Whether the addressed member exists.
    pub async fn exists(&self) -> Result<bool, RpcError> {
        self.session.exists(&self.path).await
    }

    /// Invoke with no arguments.
    pub async fn invoke(&self) -> Result<Value, RpcError> {
        self.call_with(Vec::new(), Map::new()).await
    }

    /// Invoke with positional arguments.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_with(args, Map::new()).await
    }

    /// Invoke with positional and keyword arguments.
    pub async fn call_with(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, RpcError> {
        self.session.call(&self.path, args, kwargs).await
    }

    /// String form of the addressed member.
    pub async fn to_remote_string(&self) -> Result<String, RpcError> {
        self.session.get_attr_str(&self.path).await
    }

    /// Assign member `name` of the addressed object.
    pub async fn set(&self, name: &str, value: Value) -> Result<(), RpcError> {
        self.session.set_attr(&join_path(&self.path, name), value).await
    }

    /// Remove member `name` of the addressed object.
    pub async fn delete(&self, name: &str) -> Result<(), RpcError> {
        self.session.del_attr(&join_path(&self.path, name)).await
    }
}

impl fmt::Debug for RemoteRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRef")
            .field("peer", &self.session.peer_addr())
            .field("path", &self.path)
            .finish()
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}
