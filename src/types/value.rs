use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use bigdecimal::BigDecimal;
use uuid::Uuid;

/// NUMERIC cell value: an arbitrary-precision, scale-preserving decimal or the special NaN.
#[derive(Debug, Clone, PartialEq)]
pub enum Numeric {
    Finite(BigDecimal),
    NaN,
}

impl std::fmt::Display for Numeric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Numeric::Finite(d) => f.write_str(&crate::types::numeric::decimal_to_plain(d)),
            Numeric::NaN => f.write_str("NaN"),
        }
    }
}

/// A decoded cell or parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Numeric),
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
    Array(Vec<Value>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytea(_) => "bytea",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Array(_) => "array",
        }
    }

    /// Integer view used by routing and widening conversions.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(*v as i64),
            Value::Int4(v) => Some(*v as i64),
            Value::Int8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn numeric(d: BigDecimal) -> Value { Value::Numeric(Numeric::Finite(d)) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int4(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int8(v) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(x) => x.into(),
            None => Value::Null,
        }
    }
}
