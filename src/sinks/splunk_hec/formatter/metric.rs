use serde_json::{Map, Value as JsonValue};

use super::{utf8::Utf8Encoder, EncodingError, Envelope, HecFormatter, MetricMode, Payload};
use crate::{event::ObjectMap, internal_events::SplunkMetricFieldMissing};

const METRIC_NAME: &str = "metric_name";
const METRIC_VALUE: &str = "_value";

impl HecFormatter {
    pub(super) fn format_metric(
        &self,
        mode: &MetricMode,
        envelope: Envelope,
        mut body: ObjectMap,
        encoder: &mut Utf8Encoder<'_>,
    ) -> Result<Vec<Payload>, EncodingError> {
        match mode {
            MetricMode::FromEvent => {
                let dimensions = match &self.fields {
                    Some(fields) => Self::fields_json(self.extract_fields(fields, &mut body), encoder)?,
                    None => Map::new(),
                };

                let mut payloads = Vec::with_capacity(body.len());
                for (key, value) in &body {
                    if value.is_null() {
                        continue;
                    }
                    let mut fields = dimensions.clone();
                    fields.insert(METRIC_NAME.to_owned(), JsonValue::String(encoder.string(key)?));
                    fields.insert(METRIC_VALUE.to_owned(), encoder.value(value)?);
                    payloads.push(envelope.payload(metric_event(), Some(fields)));
                }
                Ok(payloads)
            }
            MetricMode::Explicit {
                name_key,
                value_key,
            } => {
                let name = name_key.remove(&mut body).filter(|value| !value.is_null());
                let value = value_key.remove(&mut body).filter(|value| !value.is_null());
                let (Some(name), Some(value)) = (name, value) else {
                    emit!(SplunkMetricFieldMissing {
                        name_key: name_key.to_string(),
                        value_key: value_key.to_string(),
                    });
                    return Ok(Vec::new());
                };

                let mut fields = match &self.fields {
                    Some(fields) => Self::fields_json(self.extract_fields(fields, &mut body), encoder)?,
                    None => {
                        body.retain(|_, value| !value.is_null());
                        encoder.object(&body)?
                    }
                };
                fields.insert(METRIC_NAME.to_owned(), encoder.value(&name)?);
                fields.insert(METRIC_VALUE.to_owned(), encoder.value(&value)?);

                Ok(vec![envelope.payload(metric_event(), Some(fields))])
            }
        }
    }
}

fn metric_event() -> JsonValue {
    JsonValue::String("metric".to_owned())
}
