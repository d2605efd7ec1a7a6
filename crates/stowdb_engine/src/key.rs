//! Record keys and key paths.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A record key.
///
/// Keys are totally ordered: all integers sort before all text keys, and
/// all text keys before all byte keys. Full-store scans return records in
/// key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Integer key (also used for generated keys).
    Int(i64),
    /// UTF-8 text key.
    Text(String),
    /// Binary key.
    Bytes(Vec<u8>),
}

impl Key {
    /// Converts a JSON value into a key, if it is a valid key.
    ///
    /// Integers and strings are valid keys; everything else is not.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts this key into a JSON value.
    ///
    /// Byte keys become arrays of numbers.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Text(s) => Value::String(s.clone()),
            Key::Bytes(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
        }
    }

    /// Returns the integer if this is an integer key.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text if this is a text key.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Key::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s:?}"),
            Key::Bytes(b) => write!(f, "bytes[{}]", b.len()),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Bytes(b)
    }
}

/// Checks that a key path is a non-empty dotted path with no empty segments.
pub fn validate_key_path(path: &str) -> EngineResult<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(EngineError::data(format!("invalid key path {path:?}")));
    }
    Ok(())
}

/// Extracts the key found at `path` in `value`.
///
/// Returns `None` if any segment is missing or the final value is not a
/// valid key.
#[must_use]
pub fn extract_key(value: &Value, path: &str) -> Option<Key> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Key::from_value(current)
}

/// Writes `key` at `path` inside `value`, creating intermediate objects.
///
/// Fails if a segment along the way exists but is not an object.
pub fn inject_key(value: &mut Value, path: &str, key: &Key) -> EngineResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| EngineError::data("empty key path"))?;

    let mut current = value;
    for segment in parents {
        let object = current
            .as_object_mut()
            .ok_or_else(|| EngineError::data(format!("cannot inject key at {path:?}")))?;
        current = object
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let object = current
        .as_object_mut()
        .ok_or_else(|| EngineError::data(format!("cannot inject key at {path:?}")))?;
    object.insert((*last).to_string(), key.to_value());
    Ok(())
}
