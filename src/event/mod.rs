use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

mod path;
mod value;

pub use path::{KeyPath, PathParseError};
pub use value::{ObjectMap, Value};

/// Event timestamp with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventTime {
    secs: i64,
    nanos: u32,
}

impl EventTime {
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Self {
            secs: secs + (nanos / 1_000_000_000) as i64,
            nanos: nanos % 1_000_000_000,
        }
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::new(since_epoch.as_secs() as i64, since_epoch.subsec_nanos())
    }

    pub fn from_f64(secs: f64) -> Self {
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round() as u32;
        Self::new(whole as i64, nanos)
    }

    pub const fn secs(&self) -> i64 {
        self.secs
    }

    pub const fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn as_f64(&self) -> f64 {
        self.secs as f64 + f64::from(self.nanos) / 1e9
    }
}

/// Renders as fractional seconds with millisecond precision, the form HEC
/// expects in the `time` field.
impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secs < 0 && self.nanos > 0 {
            // `nanos` counts forward from `secs`, so pre-epoch fractions borrow a second.
            let millis = (1_000_000_000 - self.nanos) / 1_000_000;
            return write!(f, "-{}.{:03}", -(self.secs + 1), millis);
        }
        write!(f, "{}.{:03}", self.secs, self.nanos / 1_000_000)
    }
}

/// One tagged record handed to the formatter.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub tag: String,
    pub time: EventTime,
    pub body: ObjectMap,
}

impl Record {
    pub fn new(tag: impl Into<String>, time: EventTime, body: ObjectMap) -> Self {
        Self {
            tag: tag.into(),
            time,
            body,
        }
    }

    /// Builds a record from a JSON object. Non-object JSON is stored under a
    /// `message` key.
    pub fn from_json(tag: impl Into<String>, time: EventTime, json: serde_json::Value) -> Self {
        let body = match Value::from(json) {
            Value::Object(map) => map,
            other => {
                let mut map = ObjectMap::new();
                map.insert("message".into(), other);
                map
            }
        };
        Self::new(tag, time, body)
    }
}
