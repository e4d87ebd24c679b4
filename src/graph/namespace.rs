//! Table-backed objects.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::args::CallArgs;
use super::object::{InvokeError, Member, RemoteObject};

/// An object defined by a table of named members.
///
/// Lookups check the object's own table first, then fall back to the
/// optional base object, so a namespace can extend another one.
pub struct Namespace {
    type_name: &'static str,
    members: RwLock<HashMap<String, Member>>,
    base: Option<Arc<dyn RemoteObject>>,
    writable: bool,
}

impl Namespace {
    /// Create an empty, read-only namespace.
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            members: RwLock::new(HashMap::new()),
            base: None,
            writable: false,
        }
    }

    /// Add a data member.
    pub fn with_value(self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, Member::value(value));
        self
    }

    /// Add a method.
    pub fn with_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Value, InvokeError> + Send + Sync + 'static,
    {
        self.insert(name, Member::method(f));
        self
    }

    /// Add a nested object.
    pub fn with_object(self, name: &str, object: Arc<dyn RemoteObject>) -> Self {
        self.insert(name, Member::object(object));
        self
    }

    /// Inherit members from `base`.
    pub fn with_base(mut self, base: Arc<dyn RemoteObject>) -> Self {
        self.base = Some(base);
        self
    }

    /// Accept remote `set_attr` and `del_attr` on own members.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Register or replace a member.
    pub fn insert(&self, name: &str, member: Member) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        members.insert(name.to_string(), member);
    }

    /// Own member names, sorted.
    pub fn names(&self) -> Vec<String> {
        let members = self.members.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = members.keys().cloned().collect();
        names.sort();
        names
    }
}

impl RemoteObject for Namespace {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn member(&self, name: &str) -> Option<Member> {
        let own = {
            let members = self.members.read().unwrap_or_else(|e| e.into_inner());
            members.get(name).cloned()
        };
        own.or_else(|| self.base.as_ref().and_then(|base| base.member(name)))
    }

    fn set_member(&self, name: &str, value: Value) -> Result<(), InvokeError> {
        if !self.writable {
            return Err(InvokeError::read_only(self.type_name, name));
        }
        self.insert(name, Member::Value(value));
        Ok(())
    }

    fn remove_member(&self, name: &str) -> Result<(), InvokeError> {
        if !self.writable {
            return Err(InvokeError::read_only(self.type_name, name));
        }
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        members
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| InvokeError::name_not_found(name))
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("type_name", &self.type_name)
            .field("members", &self.names())
            .field("has_base", &self.base.is_some())
            .finish()
    }
}
