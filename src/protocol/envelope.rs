//! Request/response envelopes.
//!
//! Every protocol message above the frame codec is a JSON map:
//!
//! ```text
//! {"module": <verb>, "args": <value>, "kwargs": {...}}
//! ```
//!
//! The `module` key carries the verb (a reserved word or a dotted path).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

use super::value::MessageValue;

/// Reply carrying a result value.
pub const VERB_RETURN: &str = "return";
/// Reply carrying a failure description.
pub const VERB_ERROR: &str = "error";
/// Path existence check.
pub const VERB_EXIST_ATTR: &str = "exist_attr";
/// Textual read of a path.
pub const VERB_GET_ATTR: &str = "get_attr";
/// Alias of [`VERB_GET_ATTR`].
pub const VERB_GET_ATTR_STR: &str = "get_attr_str";
/// Assign a member.
pub const VERB_SET_ATTR: &str = "set_attr";
/// Remove a member.
pub const VERB_DEL_ATTR: &str = "del_attr";
/// Ask the peer's dispatch loop to stop.
pub const VERB_STOP: &str = "_stop";

/// Classified verb of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb<'a> {
    Return,
    Error,
    ExistAttr,
    GetAttr,
    SetAttr,
    DelAttr,
    Stop,
    /// Any other verb: a dotted path to resolve and invoke.
    Call(&'a str),
}

impl<'a> Verb<'a> {
    /// Classify a raw verb string.
    pub fn parse(verb: &'a str) -> Self {
        match verb {
            VERB_RETURN => Self::Return,
            VERB_ERROR => Self::Error,
            VERB_EXIST_ATTR => Self::ExistAttr,
            VERB_GET_ATTR | VERB_GET_ATTR_STR => Self::GetAttr,
            VERB_SET_ATTR => Self::SetAttr,
            VERB_DEL_ATTR => Self::DelAttr,
            VERB_STOP => Self::Stop,
            path => Self::Call(path),
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Verb or dotted path.
    #[serde(rename = "module")]
    pub verb: String,

    /// Positional arguments for requests; the payload for replies.
    #[serde(default)]
    pub args: Value,

    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Envelope {
    /// Create a request envelope.
    pub fn request(verb: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            verb: verb.into(),
            args: Value::Array(args),
            kwargs,
        }
    }

    /// Invoke the member at `path`.
    pub fn call(path: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self::request(path, args, kwargs)
    }

    /// Check that `path` exists on the peer.
    pub fn exist_attr(path: &str) -> Self {
        Self::request(VERB_EXIST_ATTR, vec![Value::from(path)], Map::new())
    }

    /// Read the string form of `path`.
    pub fn get_attr_str(path: &str) -> Self {
        Self::request(VERB_GET_ATTR_STR, vec![Value::from(path)], Map::new())
    }

    /// Assign `value` to the member at `path`.
    pub fn set_attr(path: &str, value: Value) -> Self {
        Self::request(VERB_SET_ATTR, vec![Value::from(path), value], Map::new())
    }

    /// Remove the member at `path`.
    pub fn del_attr(path: &str) -> Self {
        Self::request(VERB_DEL_ATTR, vec![Value::from(path)], Map::new())
    }

    /// Graceful stop request.
    pub fn stop() -> Self {
        Self::request(VERB_STOP, Vec::new(), Map::new())
    }

    /// Successful reply.
    pub fn returning(value: Value) -> Self {
        Self {
            verb: VERB_RETURN.to_string(),
            args: value,
            kwargs: Map::new(),
        }
    }

    /// Failure reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            verb: VERB_ERROR.to_string(),
            args: Value::String(message.into()),
            kwargs: Map::new(),
        }
    }

    /// Classified verb.
    pub fn verb(&self) -> Verb<'_> {
        Verb::parse(&self.verb)
    }

    /// Positional arguments as a list.
    ///
    /// A missing `args` field is an empty list; any other non-list value
    /// is a protocol violation.
    pub fn positional(&self) -> Result<&[Value], RpcError> {
        match &self.args {
            Value::Array(items) => Ok(items.as_slice()),
            Value::Null => Ok(&[][..]),
            other => Err(RpcError::violation(format!(
                "'args' of '{}' must be a list, got {}",
                self.verb,
                json_kind(other)
            ))),
        }
    }

    /// First positional argument as a path string.
    pub fn path_arg(&self) -> Result<&str, RpcError> {
        self.positional()?
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::violation(format!("'{}' requires a path argument", self.verb)))
    }

    /// Convert into a wire value.
    pub fn to_message(&self) -> Result<MessageValue, RpcError> {
        Ok(MessageValue::Json(serde_json::to_value(self)?))
    }

    /// Parse a received wire value.
    pub fn from_message(value: MessageValue) -> Result<Self, RpcError> {
        match value {
            MessageValue::Json(json @ Value::Object(_)) => serde_json::from_value(json)
                .map_err(|e| RpcError::violation(format!("malformed envelope: {}", e))),
            other => Err(RpcError::violation(format!(
                "expected an envelope map, got {}",
                other.kind()
            ))),
        }
    }

    /// Interpret a reply: `return` yields its payload, `error` becomes
    /// [`RpcError::RemoteFailure`].
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.verb() {
            Verb::Return => Ok(self.args),
            Verb::Error => Err(RpcError::RemoteFailure {
                message: match self.args {
                    Value::String(message) => message,
                    other => other.to_string(),
                },
            }),
            _ => Err(RpcError::violation(format!(
                "expected a reply, got verb '{}'",
                self.verb
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
