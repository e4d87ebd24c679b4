//! Capability model for objects exposed to the network.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::args::CallArgs;

/// Failure raised while resolving or invoking a member.
///
/// Rendered as `<kind>: <message>` and sent to the caller as an `error`
/// envelope; it never reaches the transport layer as a Rust error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeError {
    kind: String,
    message: String,
}

impl InvokeError {
    /// Create a failure with an arbitrary kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A path segment is missing.
    pub fn name_not_found(path: &str) -> Self {
        Self::new("NameNotFound", format!("name '{}' is not defined", path))
    }

    /// Arguments were supplied to something that cannot be called.
    pub fn not_callable(path: &str) -> Self {
        Self::new("NotCallable", format!("'{}' is not callable", path))
    }

    /// A call argument is missing or has the wrong type.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("InvalidArgument", message)
    }

    /// The owning object does not accept writes.
    pub fn read_only(type_name: &str, name: &str) -> Self {
        Self::new(
            "ReadOnly",
            format!("'{}' of {} object cannot be modified", name, type_name),
        )
    }

    /// A member's own operation failed.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new("Failed", message)
    }

    /// Failure kind (e.g. "NameNotFound").
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human-readable detail.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for InvokeError {}

/// A callable member.
pub trait Method: Send + Sync {
    /// Invoke with the caller's arguments.
    ///
    /// Note: runs on a blocking thread via `spawn_blocking`.
    fn call(&self, args: CallArgs) -> Result<Value, InvokeError>;
}

impl<F> Method for F
where
    F: Fn(CallArgs) -> Result<Value, InvokeError> + Send + Sync,
{
    fn call(&self, args: CallArgs) -> Result<Value, InvokeError> {
        self(args)
    }
}

/// A named capability of an exposed object.
#[derive(Clone)]
pub enum Member {
    /// Plain data, copied out at lookup time.
    Value(Value),
    /// A nested object with its own members.
    Object(Arc<dyn RemoteObject>),
    /// A callable.
    Method(Arc<dyn Method>),
}

impl Member {
    /// Wrap plain data.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// Wrap a shared nested object.
    pub fn object(object: Arc<dyn RemoteObject>) -> Self {
        Self::Object(object)
    }

    /// Wrap a closure as a method.
    pub fn method<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Value, InvokeError> + Send + Sync + 'static,
    {
        Self::Method(Arc::new(f))
    }

    /// Whether invoking this member runs code.
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Method(_))
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Object(object) => f.debug_tuple("Object").field(&object.type_name()).finish(),
            Self::Method(_) => f.write_str("Method"),
        }
    }
}

/// An object reachable from the network.
///
/// Every exposed object opts in to a fixed set of named members; the
/// resolver never sees anything an implementation does not return from
/// [`RemoteObject::member`].
///
/// # Example
///
/// ```ignore
/// struct Counter {
///     count: Arc<AtomicI64>,
/// }
///
/// impl RemoteObject for Counter {
///     fn type_name(&self) -> &'static str {
///         "Counter"
///     }
///
///     fn member(&self, name: &str) -> Option<Member> {
///         match name {
///             "count" => Some(Member::value(self.count.load(Ordering::SeqCst))),
///             "increment" => {
///                 let count = Arc::clone(&self.count);
///                 Some(Member::method(move |args: CallArgs| {
///                     args.expect_none()?;
///                     Ok(json!(count.fetch_add(1, Ordering::SeqCst) + 1))
///                 }))
///             }
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait RemoteObject: Send + Sync {
    /// Name used in display strings and failure messages.
    fn type_name(&self) -> &'static str;

    /// Look up a member by name.
    fn member(&self, name: &str) -> Option<Member>;

    /// Assign a data member.
    ///
    /// Objects are read-only unless they override this.
    fn set_member(&self, name: &str, _value: Value) -> Result<(), InvokeError> {
        Err(InvokeError::read_only(self.type_name(), name))
    }

    /// Remove a member.
    fn remove_member(&self, name: &str) -> Result<(), InvokeError> {
        Err(InvokeError::read_only(self.type_name(), name))
    }

    /// Textual form returned for string reads of the object itself.
    fn display(&self) -> String {
        format!("<{} object>", self.type_name())
    }
}
