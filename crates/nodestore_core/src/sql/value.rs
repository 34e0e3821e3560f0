//! SQL values and type-category conversion tables.

use crate::node::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value bound to, or read from, a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// Short text.
    Text(String),
    /// Character large object.
    Clob(String),
    /// Binary data.
    Blob(Vec<u8>),
    /// Timestamp in milliseconds.
    Timestamp(i64),
}

impl SqlValue {
    /// Returns the value as an integer, converting text and reals.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) | Self::Timestamp(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Real(f) => Some(*f as i64),
            Self::Text(s) | Self::Clob(s) => s.trim().parse().ok(),
            Self::Null | Self::Blob(_) => None,
        }
    }

    /// Returns the value rendered as an id or key string.
    #[must_use]
    pub fn to_id_string(&self) -> Option<String> {
        match self {
            Self::Null | Self::Blob(_) => None,
            Self::Integer(i) | Self::Timestamp(i) => Some(i.to_string()),
            #[allow(clippy::cast_possible_truncation)]
            Self::Real(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some((*f as i64).to_string()),
            Self::Real(f) => Some(f.to_string()),
            Self::Text(s) | Self::Clob(s) => Some(s.clone()),
        }
    }

    /// Returns true for NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) | Self::Timestamp(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) | Self::Clob(s) => f.write_str(&super::quote_literal(s)),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Declared SQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    /// BIT
    Bit,
    /// BOOLEAN
    Boolean,
    /// TINYINT
    TinyInt,
    /// SMALLINT
    SmallInt,
    /// INTEGER
    Integer,
    /// BIGINT
    BigInt,
    /// REAL
    Real,
    /// FLOAT
    Float,
    /// DOUBLE
    Double,
    /// DECIMAL
    Decimal,
    /// NUMERIC
    Numeric,
    /// CHAR
    Char,
    /// VARCHAR
    #[default]
    Varchar,
    /// LONGVARCHAR
    LongVarchar,
    /// CLOB
    Clob,
    /// BINARY
    Binary,
    /// VARBINARY
    VarBinary,
    /// LONGVARBINARY
    LongVarBinary,
    /// BLOB
    Blob,
    /// DATE
    Date,
    /// TIME
    Time,
    /// TIMESTAMP
    Timestamp,
    /// NULL
    Null,
    /// Anything else; treated as text.
    Other,
}

/// Conversion category shared by several SQL types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlCategory {
    /// Bit and boolean.
    Boolean = 0,
    /// Integer types.
    Integral = 1,
    /// Approximate numerics.
    Floating = 2,
    /// Exact numerics.
    Numeric = 3,
    /// Short character data.
    Text = 4,
    /// Long character data.
    LongText = 5,
    /// Binary data.
    Binary = 6,
    /// Dates and times.
    Temporal = 7,
    /// The NULL type.
    Null = 8,
}

impl SqlType {
    /// Returns the conversion category.
    #[must_use]
    pub const fn category(self) -> SqlCategory {
        match self {
            Self::Bit | Self::Boolean => SqlCategory::Boolean,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt => SqlCategory::Integral,
            Self::Real | Self::Float | Self::Double => SqlCategory::Floating,
            Self::Decimal | Self::Numeric => SqlCategory::Numeric,
            Self::Char | Self::Varchar | Self::Other => SqlCategory::Text,
            Self::LongVarchar | Self::Clob => SqlCategory::LongText,
            Self::Binary | Self::VarBinary | Self::LongVarBinary | Self::Blob => SqlCategory::Binary,
            Self::Date | Self::Time | Self::Timestamp => SqlCategory::Temporal,
            Self::Null => SqlCategory::Null,
        }
    }
}

type Binder = fn(&Value, usize) -> SqlValue;
type Reader = fn(SqlValue) -> Value;

const BINDERS: [Binder; 9] = [
    bind_boolean,
    bind_integral,
    bind_floating,
    bind_numeric,
    bind_text,
    bind_long_text,
    bind_binary,
    bind_temporal,
    bind_null,
];

const READERS: [Reader; 9] = [
    read_boolean,
    read_integral,
    read_floating,
    read_numeric,
    read_text,
    read_text,
    read_binary,
    read_temporal,
    read_null,
];

/// Converts a property value into a statement parameter for a column of
/// type `sql_type`. Text longer than `max_text_len` in a long-text column
/// is bound as a CLOB.
#[must_use]
pub fn bind_value(sql_type: SqlType, value: &Value, max_text_len: usize) -> SqlValue {
    if value.is_null() {
        return SqlValue::Null;
    }
    BINDERS[sql_type.category() as usize](value, max_text_len)
}

/// Converts a result column of type `sql_type` into a property value.
#[must_use]
pub fn read_value(sql_type: SqlType, value: SqlValue) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    READERS[sql_type.category() as usize](value)
}

fn text_of(value: &Value) -> SqlValue {
    value.as_string().map_or(SqlValue::Null, SqlValue::Text)
}

fn bind_boolean(value: &Value, _: usize) -> SqlValue {
    let b = match value {
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        other => matches!(
            other.as_string().as_deref().map(str::trim),
            Some("true" | "1" | "yes")
        ),
    };
    SqlValue::Integer(i64::from(b))
}

fn bind_integral(value: &Value, _: usize) -> SqlValue {
    match value {
        Value::Integer(i) | Value::Date(i) => SqlValue::Integer(*i),
        #[allow(clippy::cast_possible_truncation)]
        Value::Float(f) => SqlValue::Integer(*f as i64),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        other => match other.as_string() {
            Some(s) => s
                .trim()
                .parse::<i64>()
                .map_or(SqlValue::Text(s), SqlValue::Integer),
            None => SqlValue::Null,
        },
    }
}

fn bind_floating(value: &Value, _: usize) -> SqlValue {
    match value {
        Value::Float(f) => SqlValue::Real(*f),
        #[allow(clippy::cast_precision_loss)]
        Value::Integer(i) | Value::Date(i) => SqlValue::Real(*i as f64),
        Value::Boolean(b) => SqlValue::Real(if *b { 1.0 } else { 0.0 }),
        other => match other.as_string() {
            Some(s) => s.trim().parse::<f64>().map_or(SqlValue::Text(s), SqlValue::Real),
            None => SqlValue::Null,
        },
    }
}

fn bind_numeric(value: &Value, max: usize) -> SqlValue {
    match value {
        Value::Integer(i) => SqlValue::Integer(*i),
        other => bind_floating(other, max),
    }
}

fn bind_text(value: &Value, _: usize) -> SqlValue {
    text_of(value)
}

fn bind_long_text(value: &Value, max_text_len: usize) -> SqlValue {
    match text_of(value) {
        SqlValue::Text(s) if s.len() > max_text_len => SqlValue::Clob(s),
        other => other,
    }
}

fn bind_binary(value: &Value, _: usize) -> SqlValue {
    match value {
        Value::Object(o) => SqlValue::Blob(o.to_string().into_bytes()),
        other => other
            .as_string()
            .map_or(SqlValue::Null, |s| SqlValue::Blob(s.into_bytes())),
    }
}

fn bind_temporal(value: &Value, _: usize) -> SqlValue {
    match value {
        Value::Date(d) | Value::Integer(d) => SqlValue::Timestamp(*d),
        other => text_of(other),
    }
}

fn bind_null(_: &Value, _: usize) -> SqlValue {
    SqlValue::Null
}

fn read_boolean(value: SqlValue) -> Value {
    match value {
        SqlValue::Integer(i) => Value::Boolean(i != 0),
        SqlValue::Real(f) => Value::Boolean(f != 0.0),
        SqlValue::Text(s) | SqlValue::Clob(s) => {
            Value::Boolean(matches!(s.trim(), "true" | "1" | "yes" | "t" | "y"))
        }
        _ => Value::Null,
    }
}

fn read_integral(value: SqlValue) -> Value {
    value.as_i64().map_or(Value::Null, Value::Integer)
}

fn read_floating(value: SqlValue) -> Value {
    match value {
        SqlValue::Real(f) => Value::Float(f),
        #[allow(clippy::cast_precision_loss)]
        SqlValue::Integer(i) => Value::Float(i as f64),
        SqlValue::Text(s) | SqlValue::Clob(s) => s.trim().parse().map_or(Value::Null, Value::Float),
        _ => Value::Null,
    }
}

fn read_numeric(value: SqlValue) -> Value {
    match value {
        SqlValue::Integer(i) => Value::Integer(i),
        other => read_floating(other),
    }
}

fn read_text(value: SqlValue) -> Value {
    match value {
        SqlValue::Text(s) | SqlValue::Clob(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        other => other.to_id_string().map_or(Value::Null, Value::String),
    }
}

fn read_binary(value: SqlValue) -> Value {
    match value {
        SqlValue::Blob(b) => serde_json::from_slice(&b)
            .map(Value::Object)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&b).into_owned())),
        other => read_text(other),
    }
}

fn read_temporal(value: SqlValue) -> Value {
    match value {
        SqlValue::Timestamp(d) | SqlValue::Integer(d) => Value::Date(d),
        #[allow(clippy::cast_possible_truncation)]
        SqlValue::Real(f) => Value::Date(f as i64),
        SqlValue::Text(s) | SqlValue::Clob(s) => s
            .trim()
            .parse::<i64>()
            .map_or(Value::String(s), Value::Date),
        SqlValue::Blob(_) | SqlValue::Null => Value::Null,
    }
}

fn read_null(_: SqlValue) -> Value {
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    #[test]
    fn integral_binding() {
        assert_eq!(bind_value(SqlType::Integer, &Value::from("42"), 10), SqlValue::Integer(42));
        assert_eq!(bind_value(SqlType::BigInt, &Value::from(7i64), 10), SqlValue::Integer(7));
        assert_eq!(
            bind_value(SqlType::Integer, &Value::Node(Key::db(Some("p"), "9")), 10),
            SqlValue::Integer(9)
        );
        assert_eq!(
            bind_value(SqlType::Integer, &Value::from("abc"), 10),
            SqlValue::Text("abc".into())
        );
    }

    #[test]
    fn null_binds_null_for_every_type() {
        for ty in [SqlType::Bit, SqlType::Varchar, SqlType::Blob, SqlType::Timestamp] {
            assert_eq!(bind_value(ty, &Value::Null, 10), SqlValue::Null);
        }
    }

    #[test]
    fn long_text_switches_to_clob() {
        let short = bind_value(SqlType::Clob, &Value::from("abc"), 5);
        let long = bind_value(SqlType::Clob, &Value::from("abcdefgh"), 5);
        assert_eq!(short, SqlValue::Text("abc".into()));
        assert_eq!(long, SqlValue::Clob("abcdefgh".into()));
        // plain varchar never becomes a clob
        assert_eq!(
            bind_value(SqlType::Varchar, &Value::from("abcdefgh"), 5),
            SqlValue::Text("abcdefgh".into())
        );
    }

    #[test]
    fn boolean_round_trip() {
        let bound = bind_value(SqlType::Bit, &Value::from(true), 0);
        assert_eq!(bound, SqlValue::Integer(1));
        assert_eq!(read_value(SqlType::Bit, bound), Value::Boolean(true));
    }

    #[test]
    fn temporal_reading() {
        assert_eq!(read_value(SqlType::Timestamp, SqlValue::Integer(5)), Value::Date(5));
        assert_eq!(
            read_value(SqlType::Date, SqlValue::Text("2020-01-01".into())),
            Value::String("2020-01-01".into())
        );
    }

    #[test]
    fn text_reading_renders_numbers() {
        assert_eq!(read_value(SqlType::Varchar, SqlValue::Integer(3)), Value::from("3"));
        assert_eq!(read_value(SqlType::Varchar, SqlValue::Null), Value::Null);
    }

    #[test]
    fn binary_reads_json_objects() {
        let obj = Value::Object(serde_json::json!({"a": 1}));
        let bound = bind_value(SqlType::Blob, &obj, 0);
        assert_eq!(read_value(SqlType::Blob, bound), obj);
    }

    #[test]
    fn id_string_from_real() {
        assert_eq!(SqlValue::Real(42.0).to_id_string(), Some("42".into()));
        assert_eq!(SqlValue::Null.to_id_string(), None);
    }
}
