use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use snafu::{ResultExt, Snafu};

use super::{utf8::Utf8Encoder, EncodingError};
use crate::event::{KeyPath, ObjectMap, PathParseError};

#[derive(Debug, Snafu)]
pub enum PatternError {
    #[snafu(display("Invalid tag pattern {:?}: {}", pattern, source))]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[snafu(display("Empty tag pattern"))]
    EmptyPattern,
    #[snafu(display("Invalid message_key: {}", source))]
    InvalidMessageKey { source: PathParseError },
}

/// A tag pattern in fluent match syntax.
///
/// `*` matches one dot-separated tag part, `**` matches zero or more parts,
/// `{a,b}` matches either alternative, and whitespace separates patterns that
/// are OR-ed together.
#[derive(Debug, Clone)]
pub struct TagPattern {
    source: String,
    regexes: Vec<Regex>,
}

impl TagPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let regexes = pattern
            .split_whitespace()
            .map(|glob| {
                Regex::new(&glob_to_regex(glob)).context(InvalidPatternSnafu { pattern: glob })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if regexes.is_empty() {
            return Err(PatternError::EmptyPattern);
        }
        Ok(Self {
            source: pattern.to_owned(),
            regexes,
        })
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.regexes.iter().any(|regex| regex.is_match(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> String {
    let chars = glob.chars().collect::<Vec<_>>();
    // One output buffer per open `{`; alternatives collected per level.
    let mut buffers = vec![String::new()];
    let mut alternatives: Vec<Vec<String>> = Vec::new();
    let mut escape = false;
    let mut dot = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let current = buffers.last_mut().expect("buffer stack is never empty");
        if escape {
            current.push_str(&regex::escape(&c.to_string()));
            escape = false;
            i += 1;
            continue;
        }
        if c == '*' && chars.get(i + 1) == Some(&'*') {
            let followed_by_dot = chars.get(i + 2) == Some(&'.');
            current.push_str(match (std::mem::take(&mut dot), followed_by_dot) {
                (true, true) => r"\.(?:.*\.)?",
                (true, false) => r"(?:\..*)?",
                (false, true) => r"(?:.*\.|\A)",
                (false, false) => ".*",
            });
            i += if followed_by_dot { 3 } else { 2 };
            continue;
        }
        if dot {
            current.push_str(r"\.");
            dot = false;
        }
        match c {
            '\\' => escape = true,
            '.' => dot = true,
            '*' => current.push_str(r"[^.]*"),
            '{' => {
                alternatives.push(Vec::new());
                buffers.push(String::new());
            }
            '}' if !alternatives.is_empty() => close_group(&mut buffers, &mut alternatives),
            ',' if !alternatives.is_empty() => {
                if let (Some(done), Some(group)) = (buffers.pop(), alternatives.last_mut()) {
                    group.push(done);
                }
                buffers.push(String::new());
            }
            c if c.is_ascii_alphanumeric() || c == '_' => current.push(c),
            c => current.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    while !alternatives.is_empty() {
        close_group(&mut buffers, &mut alternatives);
    }

    format!(r"\A{}\z", buffers.concat())
}

fn close_group(buffers: &mut Vec<String>, alternatives: &mut Vec<Vec<String>>) {
    let (Some(done), Some(mut group)) = (buffers.pop(), alternatives.pop()) else {
        return;
    };
    group.push(done);
    if let Some(outer) = buffers.last_mut() {
        outer.push_str(&format!("(?:{})", group.join("|")));
    }
}

/// Built-in formatters that replace the record body embedded as `event`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    /// The record as a JSON string.
    Json,
    /// The value of a single record key as a string.
    SingleValue,
}

/// One entry of the `formats` list.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FormatConfig {
    /// Tags this formatter applies to; every tag when absent.
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub format_type: FormatType,
    /// Key read by `single_value`.
    #[serde(default = "default_message_key")]
    pub message_key: String,
    #[serde(default = "default_add_newline")]
    pub add_newline: bool,
}

fn default_message_key() -> String {
    "message".to_owned()
}

const fn default_add_newline() -> bool {
    true
}

#[derive(Debug, Clone)]
enum SubFormatter {
    Json { add_newline: bool },
    SingleValue { message_key: KeyPath, add_newline: bool },
}

/// A sub-formatter guarded by a tag pattern.
#[derive(Debug, Clone)]
pub struct MatchFormatter {
    pattern: Option<TagPattern>,
    formatter: SubFormatter,
}

impl MatchFormatter {
    pub fn from_config(config: &FormatConfig) -> Result<Self, PatternError> {
        let pattern = config.tag.as_deref().map(TagPattern::parse).transpose()?;
        let formatter = match config.format_type {
            FormatType::Json => SubFormatter::Json {
                add_newline: config.add_newline,
            },
            FormatType::SingleValue => SubFormatter::SingleValue {
                message_key: KeyPath::parse(&config.message_key).context(InvalidMessageKeySnafu)?,
                add_newline: config.add_newline,
            },
        };
        Ok(Self { pattern, formatter })
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.pattern.as_ref().is_none_or(|pattern| pattern.matches(tag))
    }

    pub(super) fn format(
        &self,
        body: &ObjectMap,
        encoder: &mut Utf8Encoder<'_>,
    ) -> Result<JsonValue, EncodingError> {
        let (mut text, add_newline) = match &self.formatter {
            SubFormatter::Json { add_newline } => {
                let json = JsonValue::Object(encoder.object(body)?);
                (json.to_string(), *add_newline)
            }
            SubFormatter::SingleValue {
                message_key,
                add_newline,
            } => {
                let text = match message_key.get(body) {
                    Some(value) => match value.as_bytes() {
                        Some(bytes) => encoder.string(bytes)?,
                        None => value.to_string_lossy().into_owned(),
                    },
                    None => String::new(),
                };
                (text, *add_newline)
            }
        };
        if add_newline {
            text.push('\n');
        }
        Ok(JsonValue::String(text))
    }
}
