//! Argument codec.
//!
//! Binds call arguments to a task kind's declared parameter names and renders
//! the result as the JSON object text stored in `request_payload`. Encoding is
//! total: a value that cannot be represented as JSON is stored as its `Debug`
//! text instead, and that fallback applies to the single value only.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::{Map, Value};

/// A value that can be captured for the audit payload.
pub trait Encode {
    /// Structured form, if the value has one.
    fn to_json(&self) -> serde_json::Result<Value>;

    /// Textual description used when `to_json` fails.
    fn describe(&self) -> String;
}

impl<T: Serialize + Debug + ?Sized> Encode for T {
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// One call argument.
pub enum Arg<'a> {
    /// Captured as JSON when possible.
    Value(&'a (dyn Encode + Sync)),
    /// Already reduced to text (values with no serde representation).
    Text(String),
}

impl<'a> Arg<'a> {
    pub fn value<T: Serialize + Debug + Sync>(value: &'a T) -> Self {
        Arg::Value(value)
    }

    /// Record a value that only has a `Debug` representation.
    pub fn opaque<T: Debug + ?Sized>(value: &T) -> Self {
        Arg::Text(format!("{value:?}"))
    }

    fn encode(&self) -> Value {
        match self {
            Arg::Value(v) => v.to_json().unwrap_or_else(|_| Value::String(v.describe())),
            Arg::Text(s) => Value::String(s.clone()),
        }
    }
}

impl Debug for Arg<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(&v.describe()).finish(),
            Arg::Text(s) => f.debug_tuple("Text").field(s).finish(),
        }
    }
}

/// Positional and keyword arguments of one invocation.
#[derive(Debug, Default)]
pub struct Arguments<'a> {
    positional: Vec<Arg<'a>>,
    keyword: Vec<(String, Arg<'a>)>,
}

impl<'a> Arguments<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, arg: Arg<'a>) -> Self {
        self.positional.push(arg);
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, arg: Arg<'a>) -> Self {
        self.keyword.push((name.into(), arg));
        self
    }

    /// Arguments as they arrive in a queue message: an object supplies
    /// keyword arguments, an array positional ones, anything else a single
    /// positional argument.
    pub fn from_json(args: &'a Value) -> Self {
        match args {
            Value::Object(map) => map
                .iter()
                .fold(Self::new(), |acc, (k, v)| acc.kwarg(k.clone(), Arg::value(v))),
            Value::Array(items) => items
                .iter()
                .fold(Self::new(), |acc, v| acc.arg(Arg::value(v))),
            Value::Null => Self::new(),
            other => Self::new().arg(Arg::value(other)),
        }
    }

    pub fn encode(&self, params: &[&str]) -> String {
        encode(&self.positional, &self.keyword, params)
    }
}

/// Encode arguments against the declared parameter list.
///
/// Positional arguments bind to `params` in order; extras are dropped.
/// Keyword arguments override a positional binding of the same name and are
/// dropped when the name is not declared.
pub fn encode(positional: &[Arg<'_>], keyword: &[(String, Arg<'_>)], params: &[&str]) -> String {
    let mut bound = Map::new();

    for (name, arg) in params.iter().zip(positional) {
        bound.insert((*name).to_string(), arg.encode());
    }
    for (name, arg) in keyword {
        if params.contains(&name.as_str()) {
            bound.insert(name.clone(), arg.encode());
        }
    }

    let object = Value::Object(bound);
    serde_json::to_string(&object).unwrap_or_else(|_| object.to_string())
}
