use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;

/// A value computed from a configuration expression.
///
/// Maps preserve the insertion order, so that arguments and exports are displayed
/// in the order in which they were declared.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

/// The evaluated arguments of a component, in the order of its schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments(IndexMap<String, Value>);

impl Value {
    /// Name of the type of this value, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns `false` if the value is, or contains, a NaN or infinite float.
    ///
    /// Such floats cannot be written in a configuration file.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::List(items) => items.iter().all(Value::is_finite),
            Value::Map(map) => map.values().all(Value::is_finite),
            _ => true,
        }
    }

    /// Looks up a key in a map. Returns `None` if the value is not a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Converts the value to TOML.
    ///
    /// TOML has no null: `Null` returns `None`, and null entries of lists and maps are skipped.
    pub fn to_toml(&self) -> Option<toml::Value> {
        let converted = match self {
            Value::Null => return None,
            Value::Bool(b) => toml::Value::Boolean(*b),
            Value::Int(i) => toml::Value::Integer(*i),
            Value::Float(f) => toml::Value::Float(*f),
            Value::String(s) => toml::Value::String(s.clone()),
            Value::List(items) => toml::Value::Array(items.iter().filter_map(Value::to_toml).collect()),
            Value::Map(map) => toml::Value::Table(
                map.iter()
                    .filter_map(|(k, v)| v.to_toml().map(|v| (k.clone(), v)))
                    .collect(),
            ),
        };
        Some(converted)
    }

    pub fn from_toml(value: toml::Value) -> Value {
        match value {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Int(i),
            toml::Value::Float(f) => Value::Float(f),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(d) => Value::String(d.to_string()),
            toml::Value::Array(items) => Value::List(items.into_iter().map(Value::from_toml).collect()),
            toml::Value::Table(t) => Value::Map(t.into_iter().map(|(k, v)| (k, Value::from_toml(v))).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::syntax::print::write_value(f, self)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the arguments as a single map value.
    pub fn to_value(&self) -> Value {
        Value::Map(self.0.clone())
    }

    pub fn into_map(self) -> IndexMap<String, Value> {
        self.0
    }

    /// Converts the arguments into a strongly typed structure.
    ///
    /// The conversion goes through TOML, hence null values are treated as absent.
    /// Durations are strings, use `humantime_serde` to deserialize them.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, toml::de::Error> {
        let table: toml::Table = self
            .0
            .iter()
            .filter_map(|(k, v)| v.to_toml().map(|v| (k.clone(), v)))
            .collect();
        toml::Value::Table(table).try_into()
    }
}

impl From<IndexMap<String, Value>> for Arguments {
    fn from(value: IndexMap<String, Value>) -> Self {
        Self(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a Arguments {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::syntax::print::write_value(f, &Value::Map(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    use super::{Arguments, Value};

    #[derive(Debug, Deserialize, PartialEq)]
    struct FileArgs {
        filename: String,
        #[serde(with = "humantime_serde")]
        poll_frequency: Duration,
        #[serde(default)]
        tags: Vec<String>,
        retries: Option<u32>,
    }

    #[test]
    fn deserialize_arguments() {
        let args: Arguments = [
            ("filename", Value::from("/tmp/a")),
            ("poll_frequency", Value::from("1m 30s")),
            ("tags", Value::from(vec!["a", "b"])),
            ("retries", Value::Null),
        ]
        .into_iter()
        .collect();
        let parsed: FileArgs = args.deserialize().unwrap();
        assert_eq!(
            parsed,
            FileArgs {
                filename: String::from("/tmp/a"),
                poll_frequency: Duration::from_secs(90),
                tags: vec![String::from("a"), String::from("b")],
                retries: None,
            }
        );
    }

    #[test]
    fn deserialize_reports_bad_types() {
        let args: Arguments = [("filename", Value::Int(1)), ("poll_frequency", Value::from("1s"))]
            .into_iter()
            .collect();
        assert!(args.deserialize::<FileArgs>().is_err());
    }

    #[test]
    fn display() {
        let v: Value = [
            ("a", Value::Int(1)),
            ("b c", Value::from(vec![Value::Float(0.5), Value::Null])),
            ("d", Value::from("x\"y")),
        ]
        .into_iter()
        .collect();
        assert_eq!(v.to_string(), r#"{ a = 1, "b c" = [0.5, null], d = "x\"y" }"#);
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
    }

    #[test]
    fn toml_conversion() {
        let v: Value = [("x", Value::Null), ("y", Value::Bool(true))].into_iter().collect();
        let t = v.to_toml().unwrap();
        assert_eq!(t.as_table().unwrap().len(), 1);
        assert_eq!(Value::from_toml(t), [("y", Value::Bool(true))].into_iter().collect());
    }
}
