use serde_json::Value as JsonValue;

use super::{utf8::Utf8Encoder, EncodingError, Envelope, HecFormatter, Payload};
use crate::{
    event::{ObjectMap, Record},
    internal_events::SplunkEmptyEventDropped,
};

impl HecFormatter {
    pub(super) fn format_event(
        &self,
        record: &Record,
        envelope: Envelope,
        mut body: ObjectMap,
        encoder: &mut Utf8Encoder<'_>,
    ) -> Result<Vec<Payload>, EncodingError> {
        let fields = match &self.fields {
            Some(fields) => Some(self.extract_fields(fields, &mut body)),
            None => None,
        };

        if body.is_empty() {
            emit!(SplunkEmptyEventDropped { tag: &record.tag });
            return Ok(Vec::new());
        }

        let event = match self.formats.iter().find(|format| format.matches(&record.tag)) {
            Some(format) => format.format(&body, encoder)?,
            None => JsonValue::Object(encoder.object(&body)?),
        };

        let fields = fields
            .filter(|fields| !fields.is_empty())
            .map(|fields| Self::fields_json(fields, encoder))
            .transpose()?;

        Ok(vec![envelope.payload(event, fields)])
    }
}
