use serde_json::{Map, Number, Value as JsonValue};
use snafu::ResultExt;

use super::{EncodingError, InvalidUtf8Snafu};
use crate::event::{ObjectMap, Value};

/// How byte strings that are not valid UTF-8 are turned into JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Utf8Coercion {
    /// Each invalid sequence is replaced with the given string.
    Replace(String),
    /// Invalid input fails the record.
    Strict,
}

/// Converts record values to JSON, counting every replaced sequence.
pub(super) struct Utf8Encoder<'a> {
    coercion: &'a Utf8Coercion,
    pub(super) replaced: usize,
}

impl<'a> Utf8Encoder<'a> {
    pub(super) const fn new(coercion: &'a Utf8Coercion) -> Self {
        Self {
            coercion,
            replaced: 0,
        }
    }

    pub(super) fn string(&mut self, bytes: &[u8]) -> Result<String, EncodingError> {
        match self.coercion {
            Utf8Coercion::Strict => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .context(InvalidUtf8Snafu {
                    sample: lossy_prefix(bytes),
                }),
            Utf8Coercion::Replace(replacement) => Ok(self.replace_invalid(bytes, replacement)),
        }
    }

    fn replace_invalid(&mut self, bytes: &[u8], replacement: &str) -> String {
        let mut out = String::with_capacity(bytes.len());
        for chunk in bytes.utf8_chunks() {
            out.push_str(chunk.valid());
            if !chunk.invalid().is_empty() {
                out.push_str(replacement);
                self.replaced += 1;
            }
        }
        out
    }

    pub(super) fn value(&mut self, value: &Value) -> Result<JsonValue, EncodingError> {
        Ok(match value {
            Value::Bytes(bytes) => JsonValue::String(self.string(bytes)?),
            Value::Integer(int) => JsonValue::Number((*int).into()),
            Value::Float(float) => Number::from_f64(*float).map_or(JsonValue::Null, JsonValue::Number),
            Value::Boolean(boolean) => JsonValue::Bool(*boolean),
            Value::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| self.value(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => JsonValue::Object(self.object(map)?),
            Value::Null => JsonValue::Null,
        })
    }

    /// Keys are coerced with the same policy as values.
    pub(super) fn object(&mut self, map: &ObjectMap) -> Result<Map<String, JsonValue>, EncodingError> {
        map.iter()
            .map(|(key, value)| Ok((self.string(key)?, self.value(value)?)))
            .collect()
    }
}

// Enough of the offending string to find it in the source data.
fn lossy_prefix(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn replace() -> Utf8Coercion {
        Utf8Coercion::Replace(" ".into())
    }

    #[test]
    fn replaces_invalid_sequences() {
        let coercion = replace();
        let mut encoder = Utf8Encoder::new(&coercion);
        assert_eq!(encoder.string(b"ab\xffcd\xfe\xfe").unwrap(), "ab cd  ");
        assert_eq!(encoder.replaced, 3);
    }

    #[test]
    fn custom_replacement_string() {
        let coercion = Utf8Coercion::Replace("?".into());
        let mut encoder = Utf8Encoder::new(&coercion);
        assert_eq!(encoder.string(b"caf\xe9").unwrap(), "caf?");
    }

    #[test]
    fn strict_rejects_invalid_input() {
        let coercion = Utf8Coercion::Strict;
        let mut encoder = Utf8Encoder::new(&coercion);
        assert!(encoder.string("ok ✓".as_bytes()).is_ok());
        let error = encoder.string(b"bad\xff").unwrap_err();
        assert!(error.to_string().contains("bad"));
    }

    #[test]
    fn coerces_nested_keys_and_values() {
        let mut map = ObjectMap::new();
        let mut inner = ObjectMap::new();
        inner.insert(bytes::Bytes::from_static(b"k\xff"), Value::from(&b"v\xff"[..]));
        map.insert("outer".into(), Value::Array(vec![Value::Object(inner), Value::Null]));

        let coercion = replace();
        let mut encoder = Utf8Encoder::new(&coercion);
        let json = encoder.object(&map).unwrap();
        assert_eq!(
            JsonValue::Object(json),
            json!({"outer": [{"k ": "v "}, null]})
        );
        assert_eq!(encoder.replaced, 2);
    }

    proptest! {
        #[test]
        fn coerced_output_is_always_valid_json(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let coercion = replace();
            let mut encoder = Utf8Encoder::new(&coercion);
            let mut map = ObjectMap::new();
            map.insert(bytes::Bytes::from(bytes.clone()), Value::from(bytes));
            let json = JsonValue::Object(encoder.object(&map).unwrap());
            let text = serde_json::to_vec(&json).unwrap();
            prop_assert!(std::str::from_utf8(&text).is_ok());
            let reparsed: JsonValue = serde_json::from_slice(&text).unwrap();
            prop_assert_eq!(reparsed, json);
        }
    }
}
