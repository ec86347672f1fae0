use std::borrow::Cow;

use bytes::Bytes;
use indexmap::IndexMap;

/// An ordered map of byte-string keys to values.
///
/// Keys are kept as raw bytes because records may originate from sources that
/// do not guarantee UTF-8; they are only validated when a payload is encoded.
pub type ObjectMap = IndexMap<Bytes, Value>;

/// A record value.
///
/// Strings are stored as `Bytes` and may contain invalid UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Bytes),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Array(Vec<Value>),
    Object(ObjectMap),
    Null,
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub const fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Renders the value as text, replacing invalid UTF-8 with U+FFFD.
    ///
    /// Scalars render the way they would appear inside a template; arrays and
    /// objects render as JSON.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        match self {
            Value::Bytes(bytes) => String::from_utf8_lossy(bytes),
            Value::Integer(int) => int.to_string().into(),
            Value::Float(float) => float.to_string().into(),
            Value::Boolean(boolean) => boolean.to_string().into(),
            Value::Null => "".into(),
            Value::Array(_) | Value::Object(_) => serde_json::Value::from(self).to_string().into(),
        }
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes.into())
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(s.into())
    }
}

impl From<i64> for Value {
    fn from(int: i64) -> Self {
        Value::Integer(int)
    }
}

impl From<i32> for Value {
    fn from(int: i32) -> Self {
        Value::Integer(int.into())
    }
}

impl From<f64> for Value {
    fn from(float: f64) -> Self {
        Value::Float(float)
    }
}

impl From<bool> for Value {
    fn from(boolean: bool) -> Self {
        Value::Boolean(boolean)
    }
}

impl From<ObjectMap> for Value {
    fn from(map: ObjectMap) -> Self {
        Value::Object(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(boolean) => Value::Boolean(boolean),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(Value::Integer)
                .or_else(|| number.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            serde_json::Value::String(s) => s.into(),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (Bytes::from(key), Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Lossy conversion used for display purposes only; payload encoding goes
/// through the formatter's UTF-8 policy instead.
impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
            Value::Integer(int) => (*int).into(),
            Value::Float(float) => serde_json::Number::from_f64(*float)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Boolean(boolean) => (*boolean).into(),
            Value::Array(items) => items.iter().map(serde_json::Value::from).collect(),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        (
                            String::from_utf8_lossy(key).into_owned(),
                            serde_json::Value::from(value),
                        )
                    })
                    .collect(),
            ),
            Value::Null => serde_json::Value::Null,
        }
    }
}
