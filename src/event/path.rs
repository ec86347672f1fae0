use std::fmt;

use snafu::Snafu;

use super::{ObjectMap, Value};

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PathParseError {
    #[snafu(display("Key path must not be empty"))]
    Empty,
    #[snafu(display("Key path {:?} contains an empty segment", path))]
    EmptySegment { path: String },
}

/// A dot separated path into a record, e.g. `agent.name`.
///
/// A leading `$.` is accepted and ignored so record-accessor style paths
/// (`$.agent.name`) resolve to the same location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    pub fn parse(path: &str) -> Result<Self, PathParseError> {
        let trimmed = path.trim();
        let trimmed = trimmed.strip_prefix("$.").unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(PathParseError::Empty);
        }

        let segments = trimmed.split('.').map(str::to_owned).collect::<Vec<_>>();
        if segments.iter().any(String::is_empty) {
            return Err(PathParseError::EmptySegment {
                path: path.to_owned(),
            });
        }

        Ok(Self { segments })
    }

    pub fn single(key: impl Into<String>) -> Self {
        Self {
            segments: vec![key.into()],
        }
    }

    pub fn get<'a>(&self, map: &'a ObjectMap) -> Option<&'a Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = map;
        for segment in parents {
            current = current.get(segment.as_bytes())?.as_object()?;
        }
        current.get(last.as_bytes())
    }

    /// Removes the value at this path, keeping the order of the remaining
    /// keys intact.
    pub fn remove(&self, map: &mut ObjectMap) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = map;
        for segment in parents {
            current = current.get_mut(segment.as_bytes())?.as_object_mut()?;
        }
        current.shift_remove(last.as_bytes())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
