use std::{fmt, sync::Arc};

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::sync::LazyLock;

use crate::event::{EventTime, KeyPath, ObjectMap, PathParseError, Value};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder regex is valid"));

static TAG_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^tag_parts\[\s*(-?\d+)\s*\]$").expect("tag_parts regex is valid")
});

static RECORD_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^record((?:\[\s*["'][^"']+["']\s*\])+)$"#).expect("record regex is valid")
});

static RECORD_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[\s*["']([^"']+)["']\s*\]"#).expect("segment regex is valid"));

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TemplateParseError {
    #[snafu(display("Unterminated placeholder in template {:?}", template))]
    Unterminated { template: String },
    #[snafu(display("Empty placeholder in template {:?}", template))]
    EmptyPlaceholder { template: String },
    #[snafu(display("Invalid record path in placeholder {:?}: {}", placeholder, source))]
    InvalidPath {
        placeholder: String,
        source: PathParseError,
    },
}

/// Produces the value of one payload field from a record.
///
/// Implemented by compiled templates and by any closure of the right shape,
/// so callers can inject resolvers backed by other expression engines.
pub trait FieldResolver: Send + Sync {
    fn resolve(&self, tag: &str, time: EventTime, record: &ObjectMap) -> Option<Value>;
}

impl<F> FieldResolver for F
where
    F: Fn(&str, EventTime, &ObjectMap) -> Option<Value> + Send + Sync,
{
    fn resolve(&self, tag: &str, time: EventTime, record: &ObjectMap) -> Option<Value> {
        self(tag, time, record)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Tag,
    TagPart(isize),
    Hostname,
    Time,
    Record(KeyPath),
}

/// A string with `${...}` placeholders, parsed once at configuration time.
///
/// Supported placeholders: `${tag}`, `${tag_parts[N]}` (negative `N` counts
/// from the end), `${hostname}`, `${time}`, `${record["key"]["nested"]}` and
/// the shorthand `${key}` for a top-level record key.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    src: String,
    parts: Vec<Part>,
    hostname: Arc<str>,
}

impl Template {
    pub fn parse(src: &str, hostname: Arc<str>) -> Result<Self, TemplateParseError> {
        let mut parts = Vec::new();
        let mut last = 0;
        for captures in PLACEHOLDER.captures_iter(src) {
            let whole = captures.get(0).expect("group 0 always matches");
            if whole.start() > last {
                parts.push(Part::Literal(src[last..whole.start()].to_owned()));
            }
            parts.push(parse_placeholder(src, captures[1].trim())?);
            last = whole.end();
        }
        let rest = &src[last..];
        if rest.contains("${") {
            return Err(TemplateParseError::Unterminated {
                template: src.to_owned(),
            });
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_owned()));
        }

        Ok(Self {
            src: src.to_owned(),
            parts,
            hostname,
        })
    }

    pub fn is_dynamic(&self) -> bool {
        self.parts.iter().any(|part| !matches!(part, Part::Literal(_)))
    }

    pub fn render(&self, tag: &str, time: EventTime, record: &ObjectMap) -> Option<Value> {
        // A lone record placeholder keeps the value's type.
        if let [Part::Record(path)] = self.parts.as_slice() {
            return path.get(record).filter(|value| !value.is_null()).cloned();
        }

        // Record bytes are copied raw so UTF-8 coercion happens at encoding.
        let mut out = Vec::with_capacity(self.src.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.extend_from_slice(text.as_bytes()),
                Part::Tag => out.extend_from_slice(tag.as_bytes()),
                Part::TagPart(index) => out.extend_from_slice(tag_part(tag, *index)?.as_bytes()),
                Part::Hostname => out.extend_from_slice(self.hostname.as_bytes()),
                Part::Time => out.extend_from_slice(time.to_string().as_bytes()),
                Part::Record(path) => match path.get(record).filter(|value| !value.is_null())? {
                    Value::Bytes(bytes) => out.extend_from_slice(bytes),
                    value => out.extend_from_slice(value.to_string_lossy().as_bytes()),
                },
            }
        }
        Some(Value::Bytes(out.into()))
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.src)
    }
}

impl FieldResolver for Template {
    fn resolve(&self, tag: &str, time: EventTime, record: &ObjectMap) -> Option<Value> {
        self.render(tag, time, record)
    }
}

fn parse_placeholder(src: &str, inner: &str) -> Result<Part, TemplateParseError> {
    if inner.is_empty() {
        return Err(TemplateParseError::EmptyPlaceholder {
            template: src.to_owned(),
        });
    }
    let part = match inner {
        "tag" => Part::Tag,
        "hostname" => Part::Hostname,
        "time" => Part::Time,
        _ => {
            if let Some(captures) = TAG_PART.captures(inner) {
                // The regex only admits an optional sign and digits.
                Part::TagPart(captures[1].parse().unwrap_or(isize::MAX))
            } else if let Some(captures) = RECORD_ACCESS.captures(inner) {
                let path = RECORD_SEGMENT
                    .captures_iter(&captures[1])
                    .map(|segment| segment[1].to_owned())
                    .collect::<Vec<_>>()
                    .join(".");
                Part::Record(KeyPath::parse(&path).context(InvalidPathSnafu { placeholder: inner })?)
            } else {
                Part::Record(KeyPath::parse(inner).context(InvalidPathSnafu { placeholder: inner })?)
            }
        }
    };
    Ok(part)
}

fn tag_part(tag: &str, index: isize) -> Option<&str> {
    let parts = tag.split('.').collect::<Vec<_>>();
    let index = if index < 0 {
        parts.len().checked_sub(index.unsigned_abs())?
    } else {
        index as usize
    };
    parts.get(index).copied()
}

/// How templated configuration values are interpreted.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TemplateEngine {
    /// `${...}` placeholders are expanded per record.
    #[default]
    Placeholder,
    /// Values are used verbatim.
    None,
}

impl TemplateEngine {
    pub fn compile(
        self,
        src: &str,
        hostname: &Arc<str>,
    ) -> Result<FieldValue, TemplateParseError> {
        match self {
            TemplateEngine::None => Ok(FieldValue::Literal(src.into())),
            TemplateEngine::Placeholder => {
                let template = Template::parse(src, Arc::clone(hostname))?;
                Ok(if template.is_dynamic() {
                    FieldValue::Template(template)
                } else {
                    FieldValue::Literal(src.into())
                })
            }
        }
    }
}

/// The configured source of one payload field, resolved once at setup and
/// applied to every record.
#[derive(Clone)]
pub enum FieldValue {
    /// A constant.
    Literal(Value),
    /// A compiled placeholder template.
    Template(Template),
    /// A value read from the record; the key is removed from the event body.
    RecordKey(KeyPath),
    /// An injected resolver.
    Resolver(Arc<dyn FieldResolver>),
}

impl FieldValue {
    pub fn resolve(&self, tag: &str, time: EventTime, record: &ObjectMap) -> Option<Value> {
        match self {
            FieldValue::Literal(value) => Some(value.clone()),
            FieldValue::Template(template) => template.render(tag, time, record),
            FieldValue::RecordKey(path) => path.get(record).filter(|value| !value.is_null()).cloned(),
            FieldValue::Resolver(resolver) => resolver.resolve(tag, time, record),
        }
        .filter(|value| !value.is_null())
    }

    /// The record key this field consumes, if any.
    pub const fn consumed_key(&self) -> Option<&KeyPath> {
        match self {
            FieldValue::RecordKey(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            FieldValue::Template(template) => f.debug_tuple("Template").field(template).finish(),
            FieldValue::RecordKey(path) => f.debug_tuple("RecordKey").field(path).finish(),
            FieldValue::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}
