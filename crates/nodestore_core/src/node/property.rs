//! Typed property values.

use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// No value.
    Null,
    /// Text.
    String(String),
    /// Boolean.
    Boolean(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Point in time, milliseconds since the Unix epoch.
    Date(i64),
    /// Reference to another node by its primary key.
    Node(Key),
    /// Opaque structured value owned by the application.
    Object(serde_json::Value),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the name of the value's type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Date(_) => "date",
            Self::Node(_) => "node",
            Self::Object(_) => "object",
        }
    }

    /// Renders the value as a string. Every type except null has a rendering.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::String(s) => Some(s.clone()),
            Self::Boolean(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Date(d) => Some(d.to_string()),
            Self::Node(key) => key.id().map(str::to_string),
            Self::Object(o) => Some(o.to_string()),
        }
    }

    /// Returns the integer value.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the boolean value.
    #[must_use]
    pub const fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the date in milliseconds.
    #[must_use]
    pub const fn as_date(&self) -> Option<i64> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the referenced node's key.
    #[must_use]
    pub const fn as_node_key(&self) -> Option<&Key> {
        match self {
            Self::Node(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_string() {
            Some(s) => f.write_str(&s),
            None => f.write_str("null"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        Self::Node(key)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A named property with its dirty flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Property name as first set (lookups are case-insensitive).
    pub name: String,
    /// Current value.
    pub value: Value,
    /// True when the value differs from what durable storage holds.
    pub dirty: bool,
}

impl Property {
    /// Creates a dirty property.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            dirty: true,
        }
    }

    /// Creates a clean property, as read from storage.
    pub fn loaded(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            dirty: false,
        }
    }
}
