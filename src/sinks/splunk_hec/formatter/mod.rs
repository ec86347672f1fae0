//! Turns records into HEC payloads.
//!
//! Formatting runs when a record is buffered, not when its chunk is
//! delivered, so the chunk body is already the exact request body.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use snafu::{ResultExt, Snafu};

use crate::{
    event::{EventTime, KeyPath, ObjectMap, Record, Value},
    internal_events::{SplunkEventEncodeError, SplunkInvalidUtf8Replaced},
    template::{FieldResolver, FieldValue},
};

mod event;
mod matcher;
mod metric;
mod utf8;

pub use matcher::{FormatConfig, FormatType, MatchFormatter, PatternError, TagPattern};
pub use utf8::Utf8Coercion;
use utf8::Utf8Encoder;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum EncodingError {
    #[snafu(display(
        "Invalid UTF-8 near {:?}: {}; set `coerce_to_utf8 = true` to replace invalid sequences",
        sample,
        source
    ))]
    InvalidUtf8 {
        sample: String,
        source: std::str::Utf8Error,
    },
    #[snafu(display("Failed to serialize payload: {}", source))]
    Serialize { source: serde_json::Error },
}

/// One HEC payload object.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Payload {
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sourcetype: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<JsonValue>,
    pub event: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, JsonValue>>,
}

/// Payload metadata shared by every payload built from one record.
#[derive(Debug, Clone)]
struct Envelope {
    time: String,
    host: Option<JsonValue>,
    source: Option<JsonValue>,
    sourcetype: Option<JsonValue>,
    index: Option<JsonValue>,
}

impl Envelope {
    fn payload(&self, event: JsonValue, fields: Option<Map<String, JsonValue>>) -> Payload {
        Payload {
            time: self.time.clone(),
            host: self.host.clone(),
            source: self.source.clone(),
            sourcetype: self.sourcetype.clone(),
            index: self.index.clone(),
            event,
            fields,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DataMode {
    Event,
    Metric(MetricMode),
}

#[derive(Debug, Clone)]
pub enum MetricMode {
    /// Every remaining record key becomes a metric named after the key.
    FromEvent,
    /// One metric per record, named and valued from the given keys.
    Explicit { name_key: KeyPath, value_key: KeyPath },
}

/// Payload metadata that can be computed by a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Host,
    Source,
    Sourcetype,
    Index,
}

/// Formats records according to a validated configuration.
#[derive(Debug, Clone)]
pub struct HecFormatter {
    pub(crate) host: Option<FieldValue>,
    pub(crate) source: Option<FieldValue>,
    pub(crate) sourcetype: Option<FieldValue>,
    pub(crate) index: Option<FieldValue>,
    pub(crate) time_key: Option<KeyPath>,
    /// Output name and record key of each extracted field, in order.
    pub(crate) fields: Option<Vec<(String, KeyPath)>>,
    pub(crate) keep_keys: bool,
    pub(crate) mode: DataMode,
    pub(crate) formats: Vec<MatchFormatter>,
    pub(crate) utf8: Utf8Coercion,
}

impl HecFormatter {
    /// Replaces the configured source of `field` with an external resolver.
    #[must_use]
    pub fn with_resolver(mut self, field: MetadataField, resolver: Arc<dyn FieldResolver>) -> Self {
        let slot = match field {
            MetadataField::Host => &mut self.host,
            MetadataField::Source => &mut self.source,
            MetadataField::Sourcetype => &mut self.sourcetype,
            MetadataField::Index => &mut self.index,
        };
        *slot = Some(FieldValue::Resolver(resolver));
        self
    }

    /// Formats one record into zero or more payloads.
    pub fn format(&self, record: &Record) -> Result<Vec<Payload>, EncodingError> {
        let mut encoder = Utf8Encoder::new(&self.utf8);
        let result = self.format_with(record, &mut encoder);
        if encoder.replaced > 0 {
            emit!(SplunkInvalidUtf8Replaced {
                tag: &record.tag,
                count: encoder.replaced,
            });
        }
        result.inspect_err(|error| {
            emit!(SplunkEventEncodeError {
                tag: &record.tag,
                error,
            })
        })
    }

    /// Appends the serialized payloads of `record` to a chunk body and
    /// returns the number of bytes written.
    pub fn encode(&self, record: &Record, body: &mut BytesMut) -> Result<usize, EncodingError> {
        let start = body.len();
        for payload in self.format(record)? {
            serde_json::to_writer((&mut *body).writer(), &payload).context(SerializeSnafu)?;
        }
        Ok(body.len() - start)
    }

    fn format_with(
        &self,
        record: &Record,
        encoder: &mut Utf8Encoder<'_>,
    ) -> Result<Vec<Payload>, EncodingError> {
        let envelope = self.envelope(record, encoder)?;

        let mut body = record.body.clone();
        for path in self.consumed_keys() {
            path.remove(&mut body);
        }

        match &self.mode {
            DataMode::Event => self.format_event(record, envelope, body, encoder),
            DataMode::Metric(mode) => self.format_metric(mode, envelope, body, encoder),
        }
    }

    fn envelope(
        &self,
        record: &Record,
        encoder: &mut Utf8Encoder<'_>,
    ) -> Result<Envelope, EncodingError> {
        let mut resolve = |field: &Option<FieldValue>| -> Result<Option<JsonValue>, EncodingError> {
            field
                .as_ref()
                .and_then(|field| field.resolve(&record.tag, record.time, &record.body))
                .map(|value| encoder.value(&value))
                .transpose()
        };

        Ok(Envelope {
            host: resolve(&self.host)?,
            source: resolve(&self.source)?,
            sourcetype: resolve(&self.sourcetype)?,
            index: resolve(&self.index)?,
            time: self.time(record, encoder)?,
        })
    }

    fn time(&self, record: &Record, encoder: &mut Utf8Encoder<'_>) -> Result<String, EncodingError> {
        let value = self.time_key.as_ref().and_then(|path| path.get(&record.body));
        Ok(match value {
            Some(Value::Integer(secs)) => EventTime::new(*secs, 0).to_string(),
            Some(Value::Float(secs)) => EventTime::from_f64(*secs).to_string(),
            Some(Value::Bytes(text)) => encoder.string(text)?,
            _ => record.time.to_string(),
        })
    }

    fn consumed_keys(&self) -> impl Iterator<Item = &KeyPath> {
        [&self.host, &self.source, &self.sourcetype, &self.index]
            .into_iter()
            .filter_map(|field| field.as_ref().and_then(FieldValue::consumed_key))
            .chain(self.time_key.as_ref())
    }

    /// Copies the configured fields out of `body`, removing them unless
    /// `keep_keys` is set. Null and missing values are skipped.
    fn extract_fields(&self, fields: &[(String, KeyPath)], body: &mut ObjectMap) -> Vec<(String, Value)> {
        let extracted = fields
            .iter()
            .filter_map(|(name, path)| {
                path.get(body)
                    .filter(|value| !value.is_null())
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        if !self.keep_keys {
            for (_, path) in fields {
                path.remove(body);
            }
        }
        extracted
    }

    fn fields_json(
        fields: Vec<(String, Value)>,
        encoder: &mut Utf8Encoder<'_>,
    ) -> Result<Map<String, JsonValue>, EncodingError> {
        fields
            .into_iter()
            .map(|(name, value)| Ok((name, encoder.value(&value)?)))
            .collect()
    }
}
