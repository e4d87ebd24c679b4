//! Dotted-path resolution over an object graph.

use std::sync::Arc;

use serde_json::Value;

use super::args::CallArgs;
use super::object::{InvokeError, Member, RemoteObject};

/// Resolves dotted paths against a root object and runs the verbs a
/// dispatch loop needs.
///
/// The empty path names the root itself. Segments walk through nested
/// objects, JSON maps (by key) and JSON lists (by index).
#[derive(Clone)]
pub struct PathResolver {
    root: Arc<dyn RemoteObject>,
}

impl PathResolver {
    /// Create a resolver rooted at `root`.
    pub fn new(root: Arc<dyn RemoteObject>) -> Self {
        Self { root }
    }

    /// The root object.
    pub fn root(&self) -> &Arc<dyn RemoteObject> {
        &self.root
    }

    /// Resolve `path` to a member.
    pub fn resolve(&self, path: &str) -> Result<Member, InvokeError> {
        let mut current = Member::Object(Arc::clone(&self.root));
        if path.is_empty() {
            return Ok(current);
        }

        for segment in path.split('.') {
            current = step(&current, segment).ok_or_else(|| InvokeError::name_not_found(path))?;
        }
        Ok(current)
    }

    /// Whether `path` resolves.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Resolve `path` and invoke it.
    ///
    /// Methods are called with `args`. Data members and objects are
    /// returned as-is when no arguments are given (objects as their
    /// display string); passing arguments to them is a `NotCallable`
    /// failure.
    pub fn invoke(&self, path: &str, args: CallArgs) -> Result<Value, InvokeError> {
        match self.resolve(path)? {
            Member::Method(method) => method.call(args),
            Member::Value(value) if args.is_empty() => Ok(value),
            Member::Object(object) if args.is_empty() => Ok(Value::String(object.display())),
            _ => Err(InvokeError::not_callable(path)),
        }
    }

    /// Textual form of the member at `path`.
    pub fn get_attr_str(&self, path: &str) -> Result<String, InvokeError> {
        let member = self.resolve(path)?;
        Ok(render(path, &member))
    }

    /// Assign `value` to the member at `path`.
    ///
    /// The parent of `path` must resolve to an object; JSON data is copied
    /// out on lookup and cannot be assigned into.
    pub fn set_attr(&self, path: &str, value: Value) -> Result<(), InvokeError> {
        let (parent, name) = split_last(path)?;
        self.parent_object(parent, path)?.set_member(name, value)
    }

    /// Remove the member at `path`.
    pub fn del_attr(&self, path: &str) -> Result<(), InvokeError> {
        let (parent, name) = split_last(path)?;
        self.parent_object(parent, path)?.remove_member(name)
    }

    fn parent_object(&self, parent: &str, path: &str) -> Result<Arc<dyn RemoteObject>, InvokeError> {
        match self.resolve(parent)? {
            Member::Object(object) => Ok(object),
            _ => Err(InvokeError::read_only("data", path)),
        }
    }
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("root", &self.root.type_name())
            .finish()
    }
}

/// String projection of a member: strings verbatim, other data as compact
/// JSON.
pub fn render(path: &str, member: &Member) -> String {
    match member {
        Member::Value(Value::String(text)) => text.clone(),
        Member::Value(value) => value.to_string(),
        Member::Object(object) => object.display(),
        Member::Method(_) => format!("<method '{}'>", path),
    }
}

fn step(current: &Member, segment: &str) -> Option<Member> {
    if segment.is_empty() {
        return None;
    }
    match current {
        Member::Object(object) => object.member(segment),
        Member::Value(Value::Object(map)) => map.get(segment).cloned().map(Member::Value),
        Member::Value(Value::Array(items)) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index))
            .cloned()
            .map(Member::Value),
        _ => None,
    }
}

fn split_last(path: &str) -> Result<(&str, &str), InvokeError> {
    let (parent, name) = match path.rsplit_once('.') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    };
    if name.is_empty() {
        return Err(InvokeError::invalid_argument(format!(
            "'{}' does not name a member",
            path
        )));
    }
    Ok((parent, name))
}
