//! Type definitions

use crate::{JsonValue, TypeError};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::fmt;

/// Key holding the type name in every typedef
pub const TYPE_KEY: &str = "type";

/// Description of an expected value's type
///
/// A typedef is a JSON object with a `type` entry naming a registered type
/// class plus any type-specific properties. Container typedefs hold child
/// typedefs (`items` for arrays, `properties` for objects). An empty typedef
/// means "no type information", which decoders treat as a request to fall
/// back to the natural JSON mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Typedef(Map<String, JsonValue>);

impl Typedef {
    /// Creates a typedef naming only a type
    pub fn new(type_name: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), JsonValue::String(type_name.into()));
        Self(map)
    }

    /// Creates an empty typedef
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Interprets a JSON value as a typedef
    ///
    /// Only JSON objects qualify; anything else is an invalid typedef.
    pub fn from_json(json: &JsonValue) -> Result<Self, TypeError> {
        match json {
            JsonValue::Object(map) => Ok(Self(map.clone())),
            other => Err(TypeError::InvalidTypedef(format!(
                "expected an object, found {}",
                other
            ))),
        }
    }

    /// Returns the typedef as JSON
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.0.clone())
    }

    /// Returns the declared type name, if any
    pub fn type_name(&self) -> Option<&str> {
        self.0.get(TYPE_KEY).and_then(JsonValue::as_str)
    }

    /// Returns a property of the typedef
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Returns true if the typedef declares the property
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Sets a property, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.0.insert(key.into(), value)
    }

    /// Removes a property
    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    /// Builder form of [`Typedef::insert`]
    pub fn with(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Returns true if the typedef carries no information
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the typedef's properties
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Returns the underlying JSON map
    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }
}

impl fmt::Display for Typedef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typedef_type_name() {
        let typedef = Typedef::new("int");
        assert_eq!(typedef.type_name(), Some("int"));
        assert!(Typedef::empty().type_name().is_none());
    }

    #[test]
    fn test_typedef_from_json_rejects_non_objects() {
        assert!(Typedef::from_json(&json!({"type": "float"})).is_ok());
        assert!(matches!(
            Typedef::from_json(&json!("float")),
            Err(TypeError::InvalidTypedef(_))
        ));
    }

    #[test]
    fn test_typedef_serializes_transparently() {
        let typedef = Typedef::new("array").with("items", json!([{"type": "int"}]));
        let json = serde_json::to_value(&typedef).unwrap();
        assert_eq!(json, json!({"type": "array", "items": [{"type": "int"}]}));
        let back: Typedef = serde_json::from_value(json).unwrap();
        assert_eq!(back, typedef);
    }
}
