//! Call arguments with typed accessors.

use serde_json::{Map, Value};

use super::object::InvokeError;

/// Positional and keyword arguments of one invocation.
///
/// Accessors take both a position and a keyword name, so callers may pass
/// an argument either way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl CallArgs {
    /// Create call arguments.
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Positional arguments only.
    pub fn positional(args: Vec<Value>) -> Self {
        Self::new(args, Map::new())
    }

    /// Positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword arguments.
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Total number of arguments.
    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    /// Whether no arguments were given.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Argument at `index`, or keyword `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }

    /// Required argument.
    pub fn require(&self, index: usize, name: &str) -> Result<&Value, InvokeError> {
        self.get(index, name).ok_or_else(|| {
            InvokeError::invalid_argument(format!("missing required argument '{}'", name))
        })
    }

    /// Required integer argument.
    pub fn get_i64(&self, index: usize, name: &str) -> Result<i64, InvokeError> {
        self.require(index, name)?
            .as_i64()
            .ok_or_else(|| wrong_type(name, "an integer"))
    }

    /// Required floating point argument (integers are accepted).
    pub fn get_f64(&self, index: usize, name: &str) -> Result<f64, InvokeError> {
        self.require(index, name)?
            .as_f64()
            .ok_or_else(|| wrong_type(name, "a number"))
    }

    /// Required string argument.
    pub fn get_string(&self, index: usize, name: &str) -> Result<String, InvokeError> {
        self.require(index, name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| wrong_type(name, "a string"))
    }

    /// Required boolean argument.
    pub fn get_bool(&self, index: usize, name: &str) -> Result<bool, InvokeError> {
        self.require(index, name)?
            .as_bool()
            .ok_or_else(|| wrong_type(name, "a boolean"))
    }

    /// Optional integer argument.
    pub fn optional_i64(&self, index: usize, name: &str) -> Option<i64> {
        self.get(index, name).and_then(Value::as_i64)
    }

    /// Fail unless no arguments were given.
    pub fn expect_none(&self) -> Result<(), InvokeError> {
        self.expect_at_most(0)
    }

    /// Fail if more than `max` arguments were given.
    pub fn expect_at_most(&self, max: usize) -> Result<(), InvokeError> {
        if self.len() > max {
            return Err(InvokeError::invalid_argument(format!(
                "takes at most {} argument(s), {} given",
                max,
                self.len()
            )));
        }
        Ok(())
    }
}

fn wrong_type(name: &str, expected: &str) -> InvokeError {
    InvokeError::invalid_argument(format!("argument '{}' must be {}", name, expected))
}
