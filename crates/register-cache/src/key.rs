//! Composite cache keys.
//!
//! Scalar parts are written as-is. Structured parts (query option bags and
//! the like) are serialized canonically and hashed, so two structurally
//! equal objects map to the same key whatever their field order.

use serde_json::{Map, Value};

/// Hex characters kept from the BLAKE3 digest of a structured part.
const DIGEST_HEX_LEN: usize = 32;

/// One component of a composite cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    Text(String),
    Object(Value),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        Self::Text(n.to_string())
    }
}

impl From<u32> for KeyPart {
    fn from(n: u32) -> Self {
        Self::Text(n.to_string())
    }
}

impl From<u64> for KeyPart {
    fn from(n: u64) -> Self {
        Self::Text(n.to_string())
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        Self::Text(b.to_string())
    }
}

impl From<Value> for KeyPart {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::Object(_) | Value::Array(_) => Self::Object(value),
            scalar => Self::Text(scalar.to_string()),
        }
    }
}

impl KeyPart {
    fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Object(value) => {
                let canonical = canonicalize(value).to_string();
                let hash = blake3::hash(canonical.as_bytes()).to_hex();
                hash.as_str()[..DIGEST_HEX_LEN].to_string()
            }
        }
    }
}

/// Join `parts` with `:` into a deterministic cache key.
pub fn create_key<I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: Into<KeyPart>,
{
    parts
        .into_iter()
        .map(|part| part.into().render())
        .collect::<Vec<_>>()
        .join(":")
}

/// Build a cache key from heterogeneous parts: `cache_key!("key", id, opts)`.
#[macro_export]
macro_rules! cache_key {
    ($($part:expr),+ $(,)?) => {
        $crate::key::create_key([$($crate::key::KeyPart::from($part)),+])
    };
}

/// Rebuild `value` with object keys in sorted order at every depth.
///
/// `serde_json::Map` is already sorted unless some crate in the build enables
/// `preserve_order`; sorting here keeps keys stable in both cases.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
