//! Native payload values

use std::collections::BTreeMap;

/// A payload value as the process sees it, before encoding
///
/// Unlike the encoded JSON form, integers, unsigned integers and floats are
/// kept apart, and bytes are distinct from text. The typedef that travels
/// with an encoded payload is what lets a decoder restore the distinction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean
    Boolean(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    Uint(u64),
    /// Floating point number
    Float(f64),
    /// UTF-8 text
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// Ordered map from keys to values
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the type class that handles this value by default
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Number of elements, characters or bytes for sized values
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Returns true for sized values with no elements
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Returns true for the two container variants
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Builds an object from key/value pairs
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Uint(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::from(3i64).type_name(), "int");
        assert_eq!(Value::from(3u64).type_name(), "uint");
        assert_eq!(Value::from(b"ab".to_vec()).type_name(), "bytes");
        assert_eq!(Value::from("ab").type_name(), "string");
        assert_eq!(Value::Array(vec![]).type_name(), "array");
    }

    #[test]
    fn test_len_counts_chars() {
        assert_eq!(Value::from("héllo").len(), Some(5));
        assert_eq!(Value::from(b"h\xc3\xa9".to_vec()).len(), Some(3));
        assert_eq!(Value::from(1.5).len(), None);
        assert!(Value::Array(vec![]).is_empty());
    }

    #[test]
    fn test_object_builder() {
        let value = Value::object([("a", Value::from(1i64)), ("b", Value::Null)]);
        match value {
            Value::Object(map) => {
                assert_eq!(map.len(), 2);
                assert_eq!(map["a"], Value::Int(1));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }
}
