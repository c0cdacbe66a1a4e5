//! # Payloads
//!
//! The structured body carried by every bridge message, plus the positional
//! type contracts the hub can enforce per channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Raw inbound data did not decode into a [`Payload`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected an argument list, found {found}")]
pub struct ShapeError {
    pub found: ValueKind,
}

/// An ordered argument list.
///
/// The empty payload stands in for "no data"; an untyped absence never goes on
/// the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<Value>);

impl Payload {
    pub fn new(args: Vec<Value>) -> Self {
        Self(args)
    }

    /// The empty structured payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Decode inbound raw data. Only a JSON array has the expected shape.
    pub fn from_raw(raw: Value) -> Result<Self, ShapeError> {
        match raw {
            Value::Array(args) => Ok(Self(args)),
            other => Err(ShapeError {
                found: ValueKind::of(&other),
            }),
        }
    }

    /// Encode for the transport.
    pub fn into_raw(self) -> Value {
        Value::Array(self.0)
    }

    pub fn args(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append an argument.
    pub fn push(&mut self, value: impl Into<Value>) {
        self.0.push(value.into());
    }

    /// Builder form of [`Payload::push`].
    #[must_use]
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.push(value);
        self
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<Option<Payload>> for Payload {
    fn from(value: Option<Payload>) -> Self {
        value.unwrap_or_default()
    }
}

impl From<Vec<Value>> for Payload {
    fn from(args: Vec<Value>) -> Self {
        Self(args)
    }
}

impl From<Value> for Payload {
    /// `Null` becomes the empty payload, an array is taken element-wise and any
    /// other value becomes a single argument.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::empty(),
            Value::Array(args) => Self(args),
            other => Self(vec![other]),
        }
    }
}

/// JSON value categories used by type contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    /// Wildcard, only meaningful inside a contract.
    Any,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        self == ValueKind::Any || self == ValueKind::of(value)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// Positional argument types the hub expects on one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeContract(Vec<ValueKind>);

impl TypeContract {
    pub fn new(kinds: Vec<ValueKind>) -> Self {
        Self(kinds)
    }

    pub fn kinds(&self) -> &[ValueKind] {
        &self.0
    }

    /// Exact arity, and every position accepted by its declared kind.
    pub fn matches(&self, payload: &Payload) -> bool {
        payload.len() == self.0.len()
            && self
                .0
                .iter()
                .zip(payload.args())
                .all(|(kind, value)| kind.accepts(value))
    }
}

impl From<Vec<ValueKind>> for TypeContract {
    fn from(kinds: Vec<ValueKind>) -> Self {
        Self(kinds)
    }
}
