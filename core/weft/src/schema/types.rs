use std::fmt;

use crate::eval::Value;

/// Type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Any value, including `null`.
    Any,
    Bool,
    Int,
    Float,
    String,
    /// A string in the humantime format, for instance `"1m 30s"`.
    Duration,
    List(Box<ValueType>),
    Map(Box<ValueType>),
}

/// A value does not have the expected type.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// Location of the faulty element inside the value, for instance `[2].host`.
    /// Empty if the value itself is faulty.
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl ValueType {
    pub fn list(of: ValueType) -> Self {
        ValueType::List(Box::new(of))
    }

    pub fn map(of: ValueType) -> Self {
        ValueType::Map(Box::new(of))
    }

    /// Returns `true` if a value of type `other` can always be converted to `self`
    /// without looking at the value.
    ///
    /// `Any` is compatible with everything, in both directions. A `String` is accepted
    /// where a `Duration` is expected: the actual content can only be checked at evaluation time.
    pub fn accepts(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            (ValueType::Float, ValueType::Int) => true,
            (ValueType::Duration, ValueType::String) | (ValueType::String, ValueType::Duration) => true,
            (ValueType::List(a), ValueType::List(b)) | (ValueType::Map(a), ValueType::Map(b)) => a.accepts(b),
            (a, b) => a == b,
        }
    }

    /// Converts a value to this type.
    ///
    /// The only conversions are the widening of integers to floats and the validation
    /// of durations; the other values must already have the right type.
    pub fn coerce(&self, value: Value) -> Result<Value, Mismatch> {
        match (self, value) {
            (ValueType::Any, v) => Ok(v),
            (ValueType::Bool, v @ Value::Bool(_)) => Ok(v),
            (ValueType::Int, v @ Value::Int(_)) => Ok(v),
            (ValueType::Float, v @ Value::Float(_)) => Ok(v),
            (ValueType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ValueType::String, v @ Value::String(_)) => Ok(v),
            (ValueType::Duration, Value::String(s)) => match humantime::parse_duration(&s) {
                Ok(_) => Ok(Value::String(s)),
                Err(e) => Err(Mismatch {
                    path: String::new(),
                    expected: self.to_string(),
                    found: format!("\"{s}\" ({e})"),
                }),
            },
            (ValueType::List(inner), Value::List(items)) => {
                let mut res = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let item = inner.coerce(item).map_err(|e| e.nested(&format!("[{i}]")))?;
                    res.push(item);
                }
                Ok(Value::List(res))
            }
            (ValueType::Map(inner), Value::Map(entries)) => {
                let mut res = indexmap::IndexMap::with_capacity(entries.len());
                for (key, v) in entries {
                    let v = inner.coerce(v).map_err(|e| e.nested(&format!(".{key}")))?;
                    res.insert(key, v);
                }
                Ok(Value::Map(res))
            }
            (expected, found) => Err(Mismatch {
                path: String::new(),
                expected: expected.to_string(),
                found: found.type_name().to_owned(),
            }),
        }
    }
}

impl Mismatch {
    fn nested(mut self, prefix: &str) -> Self {
        self.path.insert_str(0, prefix);
        self
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => f.write_str("any"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::Int => f.write_str("int"),
            ValueType::Float => f.write_str("float"),
            ValueType::String => f.write_str("string"),
            ValueType::Duration => f.write_str("duration"),
            ValueType::List(inner) => write!(f, "list({inner})"),
            ValueType::Map(inner) => write!(f, "map({inner})"),
        }
    }
}
