//!
//! Values read from and bound to SQL statements.
//!

use std::hash::{Hash, Hasher};

use crate::{EntwineError, EntwineResult};

/// A decoded column value.
///
/// Floats compare by bit pattern, so that `Value` can key the per-query
/// instance cache like any other identifier.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Multi-column identifiers, in column order.
    Composite(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Composite(_) => "composite",
        }
    }

    /// Scalar parts of this value, composites flattened.
    pub fn flatten(&self) -> Vec<&Value> {
        match self {
            Value::Composite(parts) => parts.iter().flat_map(Value::flatten).collect(),
            other => vec![other],
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Composite(a), Value::Composite(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Composite(parts) => parts.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Typed extraction of a [Value], used by row factories.
pub trait FromValue: Sized {
    fn from_value(column: &str, value: Value) -> EntwineResult<Self>;
}

fn unexpected(column: &str, expected: &'static str, found: &Value) -> EntwineError {
    EntwineError::UnexpectedValue {
        column: column.to_string(),
        expected,
        found: found.kind().to_string(),
    }
}

impl FromValue for Value {
    fn from_value(_column: &str, value: Value) -> EntwineResult<Self> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(column: &str, value: Value) -> EntwineResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            other => Err(unexpected(column, "bool", &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(column: &str, value: Value) -> EntwineResult<Self> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(unexpected(column, "int", &other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(column: &str, value: Value) -> EntwineResult<Self> {
        match value {
            Value::Int(i) => i32::try_from(i).map_err(|_| EntwineError::UnexpectedValue {
                column: column.to_string(),
                expected: "i32",
                found: i.to_string(),
            }),
            other => Err(unexpected(column, "int", &other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(column: &str, value: Value) -> EntwineResult<Self> {
        match value {
            Value::Float(x) => Ok(x),
            Value::Int(i) => Ok(i as f64),
            other => Err(unexpected(column, "float", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(column: &str, value: Value) -> EntwineResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(unexpected(column, "text", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(column: &str, value: Value) -> EntwineResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(column, other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn composite_values_hash_by_parts() {
        let mut set = HashSet::new();
        set.insert(Value::Composite(vec![Value::Int(1), "a".into()]));
        assert!(set.contains(&Value::Composite(vec![Value::Int(1), "a".into()])));
        assert!(!set.contains(&Value::Composite(vec![Value::Int(1), "b".into()])));
    }

    #[test]
    fn flatten_nested_composite() {
        let value = Value::Composite(vec![
            Value::Int(1),
            Value::Composite(vec![Value::Int(2), Value::Int(3)]),
        ]);
        let flat: Vec<_> = value.flatten().into_iter().cloned().collect();
        assert_eq!(flat, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn typed_extraction() {
        assert_eq!(i64::from_value("id", Value::Int(4)).unwrap(), 4);
        assert_eq!(Option::<String>::from_value("name", Value::Null).unwrap(), None);
        assert!(matches!(
            String::from_value("name", Value::Int(3)),
            Err(EntwineError::UnexpectedValue { expected: "text", .. })
        ));
    }
}
