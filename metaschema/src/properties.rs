//! Schema properties
//!
//! A property is one key of a typedef that can be checked against an
//! instance. Validation encodes the instance's actual value for the
//! property and compares it with the value the schema expects.

use crate::registry::TypeRegistry;
use crate::{JsonValue, TypeError, Value};

/// A validatable typedef property
pub trait MetaschemaProperty: Send + Sync {
    /// Typedef key the property lives under
    fn name(&self) -> &'static str;

    /// Type names of the instances the property applies to
    fn types(&self) -> &'static [&'static str];

    /// Computes the instance's actual value for this property
    fn encode(&self, instance: &Value, registry: &TypeRegistry) -> Result<JsonValue, TypeError>;

    /// Compares the actual value with the expected one
    fn compare(&self, actual: &JsonValue, expected: &JsonValue) -> Vec<String> {
        if actual == expected {
            Vec::new()
        } else {
            vec![format!("{} is not equal to {}", actual, expected)]
        }
    }

    /// Checks an instance, returning one message per violation
    fn validate(&self, expected: &JsonValue, instance: &Value, registry: &TypeRegistry) -> Vec<String> {
        if !self.types().contains(&instance.type_name()) {
            return Vec::new();
        }
        match self.encode(instance, registry) {
            Ok(actual) => self.compare(&actual, expected),
            Err(err) => vec![err.to_string()],
        }
    }
}

/// The `type` property
///
/// The expected value may be a single type name or a list of alternatives.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeProperty;

impl MetaschemaProperty for TypeProperty {
    fn name(&self) -> &'static str {
        "type"
    }

    fn types(&self) -> &'static [&'static str] {
        &[
            "null", "boolean", "int", "uint", "float", "string", "bytes", "array", "object",
        ]
    }

    fn encode(&self, instance: &Value, registry: &TypeRegistry) -> Result<JsonValue, TypeError> {
        let class = registry.type_for_value(instance)?;
        Ok(JsonValue::String(class.name().to_string()))
    }

    fn compare(&self, actual: &JsonValue, expected: &JsonValue) -> Vec<String> {
        let matches = match expected {
            JsonValue::Array(options) => options.contains(actual),
            single => single == actual,
        };
        if matches {
            Vec::new()
        } else {
            vec![format!("{} is not of type {}", actual, expected)]
        }
    }
}

/// The `length` property, for strings, bytes and containers
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthProperty;

impl MetaschemaProperty for LengthProperty {
    fn name(&self) -> &'static str {
        "length"
    }

    fn types(&self) -> &'static [&'static str] {
        &["string", "bytes", "array", "object"]
    }

    fn encode(&self, instance: &Value, _registry: &TypeRegistry) -> Result<JsonValue, TypeError> {
        instance
            .len()
            .map(|len| JsonValue::from(len as u64))
            .ok_or_else(|| TypeError::mismatch("sized value", instance.type_name()))
    }

    fn compare(&self, actual: &JsonValue, expected: &JsonValue) -> Vec<String> {
        if actual.as_u64().is_some() && actual.as_u64() == expected.as_u64() {
            Vec::new()
        } else {
            vec![format!("length {} is not equal to {}", actual, expected)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_property() {
        let registry = TypeRegistry::with_defaults();
        let property = TypeProperty;
        assert!(property
            .validate(&json!("int"), &Value::Int(1), &registry)
            .is_empty());

        let errors = property.validate(&json!("string"), &Value::Int(1), &registry);
        assert_eq!(errors, vec!["\"int\" is not of type \"string\"".to_string()]);
    }

    #[test]
    fn test_type_property_alternatives() {
        let registry = TypeRegistry::with_defaults();
        let expected = json!(["int", "uint"]);
        assert!(TypeProperty
            .validate(&expected, &Value::Uint(1), &registry)
            .is_empty());
        assert_eq!(
            TypeProperty
                .validate(&expected, &Value::Float(1.0), &registry)
                .len(),
            1
        );
    }

    #[test]
    fn test_length_property() {
        let registry = TypeRegistry::with_defaults();
        let property = LengthProperty;
        assert!(property
            .validate(&json!(2), &Value::from(b"ab".to_vec()), &registry)
            .is_empty());
        assert_eq!(
            property.validate(&json!(2), &Value::from("abc"), &registry),
            vec!["length 3 is not equal to 2".to_string()]
        );
    }

    #[test]
    fn test_length_property_skips_unsized() {
        let registry = TypeRegistry::with_defaults();
        assert!(LengthProperty
            .validate(&json!(2), &Value::Int(12345), &registry)
            .is_empty());
    }
}
