//! Type registry
//!
//! A single mapping from type name to type class, plus the schema
//! properties used for validation. The process-wide instance is built once
//! by [`TypeRegistry::with_defaults`] (or handed over through
//! [`init_global`] before first use) and is read-only afterwards.

use crate::properties::{LengthProperty, MetaschemaProperty, TypeProperty};
use crate::typedef::TYPE_KEY;
use crate::types::{ArrayType, MetaschemaType, ObjectType, ScalarKind, ScalarType};
use crate::{JsonValue, TypeError, Typedef, ValidationErrors, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

/// Registry of type classes and schema properties
pub struct TypeRegistry {
    types: HashMap<&'static str, Arc<dyn MetaschemaType>>,
    properties: HashMap<&'static str, Arc<dyn MetaschemaProperty>>,
}

impl TypeRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Creates a registry holding every built-in type and property
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ScalarKind::ALL {
            registry.insert_type(Arc::new(ScalarType::new(kind)));
        }
        registry.insert_type(Arc::new(ArrayType::new()));
        registry.insert_type(Arc::new(ObjectType::new()));
        registry.insert_property(Arc::new(TypeProperty));
        registry.insert_property(Arc::new(LengthProperty));
        registry
    }

    fn insert_type(&mut self, class: Arc<dyn MetaschemaType>) {
        self.types.insert(class.name(), class);
    }

    fn insert_property(&mut self, property: Arc<dyn MetaschemaProperty>) {
        self.properties.insert(property.name(), property);
    }

    /// Registers a type class under its name
    pub fn register_type(&mut self, class: Arc<dyn MetaschemaType>) -> Result<(), TypeError> {
        let name = class.name();
        if self.types.contains_key(name) {
            return Err(TypeError::AlreadyRegistered(name.to_string()));
        }
        tracing::debug!(type_name = name, "registering metaschema type");
        self.insert_type(class);
        Ok(())
    }

    /// Registers a schema property under its name
    pub fn register_property(
        &mut self,
        property: Arc<dyn MetaschemaProperty>,
    ) -> Result<(), TypeError> {
        let name = property.name();
        if self.properties.contains_key(name) {
            return Err(TypeError::AlreadyRegistered(name.to_string()));
        }
        tracing::debug!(property = name, "registering metaschema property");
        self.insert_property(property);
        Ok(())
    }

    /// Looks up a type class by name
    pub fn get_type_class(&self, name: &str) -> Result<&dyn MetaschemaType, TypeError> {
        self.types
            .get(name)
            .map(|class| class.as_ref())
            .ok_or_else(|| TypeError::UnknownType(name.to_string()))
    }

    /// Returns true if a type class is registered under the name
    pub fn is_registered(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Returns the registered type names, sorted
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Looks up the type class that handles a native value by default
    pub fn type_for_value(&self, value: &Value) -> Result<&dyn MetaschemaType, TypeError> {
        self.get_type_class(value.type_name())
    }

    fn declared_class(&self, typedef: &Typedef) -> Result<&dyn MetaschemaType, TypeError> {
        let name = typedef
            .type_name()
            .ok_or_else(|| TypeError::MissingType(typedef.to_string()))?;
        self.get_type_class(name)
    }

    /// Infers a complete typedef from a native value
    pub fn encode_type(&self, value: &Value) -> Result<Typedef, TypeError> {
        self.type_for_value(value)?.encode_type(value, self)
    }

    /// Encodes a value, dispatching on the typedef's type when one is given
    ///
    /// A typedef that names a type the value does not belong to is a type
    /// error. A missing or untyped typedef falls back to the value's own type.
    pub fn encode_data(
        &self,
        value: &Value,
        typedef: Option<&Typedef>,
    ) -> Result<JsonValue, TypeError> {
        let class = match typedef.and_then(Typedef::type_name) {
            Some(name) => {
                let class = self.get_type_class(name)?;
                if !class.accepts(value) {
                    return Err(TypeError::mismatch(name, value.type_name()));
                }
                class
            }
            None => self.type_for_value(value)?,
        };
        class.encode_data(value, typedef, self)
    }

    /// Encodes a value and returns the typedef that decodes it
    ///
    /// A declared container typedef that leaves element typedefs out gets
    /// them filled in from the value, so the receiver decodes every element
    /// with its exact type.
    pub fn encode_with_typedef(
        &self,
        value: &Value,
        typedef: Option<&Typedef>,
    ) -> Result<(JsonValue, Typedef), TypeError> {
        let encoded = self.encode_data(value, typedef)?;
        let inferred = self.encode_type(value)?;
        let typedef = match typedef {
            Some(declared) => self.fill_typedef(declared.clone(), &inferred)?,
            None => inferred,
        };
        Ok((encoded, typedef))
    }

    /// Fills what a declared typedef leaves unset from an inferred one
    ///
    /// An untyped declaration takes the inferred typedef whole. Declarations
    /// for a different type are kept as they are.
    pub fn fill_typedef(&self, declared: Typedef, inferred: &Typedef) -> Result<Typedef, TypeError> {
        match declared.type_name() {
            None => Ok(inferred.clone()),
            Some(name) if Some(name) == inferred.type_name() => {
                self.declared_class(&declared)?.fill_typedef(declared, inferred, self)
            }
            Some(_) => Ok(declared),
        }
    }

    /// Decodes a value
    ///
    /// An empty (untyped) typedef decodes through the natural JSON mapping.
    pub fn decode_data(&self, encoded: &JsonValue, typedef: &Typedef) -> Result<Value, TypeError> {
        match typedef.type_name() {
            Some(name) => self.get_type_class(name)?.decode_data(encoded, typedef, self),
            None => Ok(self.decode_untyped(encoded)),
        }
    }

    /// Decodes JSON without type information
    pub fn decode_untyped(&self, encoded: &JsonValue) -> Value {
        match encoded {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => {
                Value::Array(items.iter().map(|item| self.decode_untyped(item)).collect())
            }
            JsonValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.decode_untyped(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }

    /// Reduces message metadata to the minimal typedef for its type
    pub fn extract_typedef(&self, metadata: &Typedef) -> Result<Typedef, TypeError> {
        self.declared_class(metadata)?.extract_typedef(metadata, self)
    }

    /// Expands a partial typedef into a complete one
    ///
    /// Accepts a bare type name (`"int"`), a list of element typedefs (an
    /// array), or a typedef object whose children may themselves be partial.
    pub fn complete_typedef(&self, partial: &JsonValue) -> Result<Typedef, TypeError> {
        let typedef = match partial {
            JsonValue::String(name) => Typedef::new(name.clone()),
            JsonValue::Array(items) => {
                Typedef::new("array").with("items", JsonValue::Array(items.clone()))
            }
            JsonValue::Object(_) => Typedef::from_json(partial)?,
            other => {
                return Err(TypeError::InvalidTypedef(format!(
                    "cannot complete typedef from {}",
                    other
                )))
            }
        };
        if !typedef.contains(TYPE_KEY) {
            return Err(TypeError::MissingType(typedef.to_string()));
        }
        self.declared_class(&typedef)?.complete_typedef(typedef, self)
    }

    /// Validates an instance against a schema, collecting every violation
    pub fn validate_instance(&self, instance: &Value, schema: &Typedef) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        self.collect_violations(instance, schema, &mut errors);
        errors.into_result()
    }

    fn collect_violations(&self, instance: &Value, schema: &Typedef, errors: &mut ValidationErrors) {
        for (key, expected) in schema.iter() {
            if let Some(property) = self.properties.get(key.as_str()) {
                for message in property.validate(expected, instance, self) {
                    errors.push(message);
                }
            }
        }

        match (instance, schema.get("items"), schema.get("properties")) {
            (Value::Array(items), Some(JsonValue::Array(children)), _) => {
                for (index, (item, child)) in items.iter().zip(children).enumerate() {
                    self.collect_nested(item, child, &format!("[{}]", index), errors);
                }
            }
            (Value::Object(map), _, Some(JsonValue::Object(children))) => {
                for (key, child) in children {
                    if let Some(item) = map.get(key) {
                        self.collect_nested(item, child, key, errors);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_nested(
        &self,
        instance: &Value,
        schema: &JsonValue,
        path: &str,
        errors: &mut ValidationErrors,
    ) {
        let mut nested = ValidationErrors::new();
        match Typedef::from_json(schema) {
            Ok(schema) => self.collect_violations(instance, &schema, &mut nested),
            Err(err) => nested.push(err.to_string()),
        }
        errors.extend_at(path, nested.messages().iter().cloned());
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Returns the process-wide registry, building the defaults on first use
pub fn global() -> &'static TypeRegistry {
    GLOBAL.get_or_init(TypeRegistry::with_defaults)
}

/// Installs a custom process-wide registry
///
/// Must run during startup, before anything calls [`global`]. Hands the
/// registry back if the global one is already initialized.
pub fn init_global(registry: TypeRegistry) -> Result<(), TypeRegistry> {
    GLOBAL.set(registry)
}

/// Looks up a type class in the process-wide registry
pub fn get_type_class(name: &str) -> Result<&'static dyn MetaschemaType, TypeError> {
    global().get_type_class(name)
}

/// Encodes a value with the process-wide registry
pub fn encode_data(value: &Value, typedef: Option<&Typedef>) -> Result<JsonValue, TypeError> {
    global().encode_data(value, typedef)
}

/// Encodes a value and infers its typedef with the process-wide registry
pub fn encode_with_typedef(
    value: &Value,
    typedef: Option<&Typedef>,
) -> Result<(JsonValue, Typedef), TypeError> {
    global().encode_with_typedef(value, typedef)
}

/// Decodes a value with the process-wide registry
pub fn decode_data(encoded: &JsonValue, typedef: &Typedef) -> Result<Value, TypeError> {
    global().decode_data(encoded, typedef)
}

/// Completes a partial typedef with the process-wide registry
pub fn complete_typedef(partial: &JsonValue) -> Result<Typedef, TypeError> {
    global().complete_typedef(partial)
}

/// Extracts a minimal typedef with the process-wide registry
pub fn extract_typedef(metadata: &Typedef) -> Result<Typedef, TypeError> {
    global().extract_typedef(metadata)
}

/// Validates an instance with the process-wide registry
pub fn validate_instance(instance: &Value, schema: &Typedef) -> Result<(), ValidationErrors> {
    global().validate_instance(instance, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested_value() -> Value {
        Value::object([
            ("name", Value::from("sensor")),
            ("count", Value::Uint(3)),
            (
                "samples",
                Value::Array(vec![
                    Value::object([("t", Value::Float(0.5)), ("raw", Value::from(b"ab".to_vec()))]),
                    Value::object([("t", Value::Float(1.5)), ("raw", Value::from(b"cd".to_vec()))]),
                ]),
            ),
        ])
    }

    #[test]
    fn test_defaults_registered() {
        let registry = TypeRegistry::with_defaults();
        assert_eq!(
            registry.type_names(),
            vec!["array", "boolean", "bytes", "float", "int", "null", "object", "string", "uint"]
        );
    }

    #[test]
    fn test_unknown_type_lookup_fails() {
        let registry = TypeRegistry::with_defaults();
        assert!(matches!(
            registry.get_type_class("quaternion"),
            Err(TypeError::UnknownType(name)) if name == "quaternion"
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = TypeRegistry::with_defaults();
        let result = registry.register_type(Arc::new(ScalarType::new(ScalarKind::Int)));
        assert_eq!(result, Err(TypeError::AlreadyRegistered("int".to_string())));
    }

    #[test]
    fn test_nested_round_trip() {
        let registry = TypeRegistry::with_defaults();
        let value = nested_value();
        let (encoded, typedef) = registry.encode_with_typedef(&value, None).unwrap();
        let decoded = registry.decode_data(&encoded, &typedef).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_round_trip_with_declared_typedef() {
        let registry = TypeRegistry::with_defaults();
        let typedef = registry
            .complete_typedef(&json!({
                "type": "array",
                "items": ["int", {"type": "array", "items": ["bytes", "float"]}]
            }))
            .unwrap();
        let value = Value::Array(vec![
            Value::Int(4),
            Value::Array(vec![Value::from(b"x".to_vec()), Value::Float(2.0)]),
        ]);

        let encoded = registry.encode_data(&value, Some(&typedef)).unwrap();
        assert_eq!(encoded, json!([4, ["x", 2.0]]));
        assert_eq!(registry.decode_data(&encoded, &typedef).unwrap(), value);
    }

    #[test]
    fn test_bare_container_typedef_filled_from_value() {
        let registry = TypeRegistry::with_defaults();
        let declared = registry.complete_typedef(&json!({"type": "array"})).unwrap();
        let value = Value::Array(vec![Value::from(b"ab".to_vec()), Value::Uint(3)]);

        let (encoded, typedef) = registry.encode_with_typedef(&value, Some(&declared)).unwrap();
        assert_eq!(
            typedef.to_json(),
            json!({"type": "array", "items": [{"type": "bytes"}, {"type": "uint"}]})
        );
        assert_eq!(registry.decode_data(&encoded, &typedef).unwrap(), value);
    }

    #[test]
    fn test_declared_element_typedefs_kept_when_filling() {
        let registry = TypeRegistry::with_defaults();
        let declared = registry
            .complete_typedef(&json!({
                "type": "object",
                "properties": {"id": {"type": "string"}, "rows": {"type": "array"}}
            }))
            .unwrap();
        let value = Value::object([
            ("id", Value::from("a1")),
            ("rows", Value::Array(vec![Value::Uint(7)])),
            ("raw", Value::from(b"zz".to_vec())),
        ]);

        let (encoded, typedef) = registry.encode_with_typedef(&value, Some(&declared)).unwrap();
        assert_eq!(
            typedef.to_json(),
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "rows": {"type": "array", "items": [{"type": "uint"}]},
                    "raw": {"type": "bytes"}
                }
            })
        );
        assert_eq!(registry.decode_data(&encoded, &typedef).unwrap(), value);
    }

    #[test]
    fn test_missing_element_typedef_falls_back() {
        let registry = TypeRegistry::with_defaults();
        let typedef = Typedef::new("object").with("properties", json!({"a": {"type": "bytes"}}));
        let decoded = registry
            .decode_data(&json!({"a": "xy", "b": [1, 2.5]}), &typedef)
            .unwrap();

        let expected = Value::object([
            ("a", Value::from(b"xy".to_vec())),
            ("b", Value::Array(vec![Value::Int(1), Value::Float(2.5)])),
        ]);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_container_kind_mismatch_is_type_error() {
        let registry = TypeRegistry::with_defaults();
        let value = Value::object([("a", Value::Int(1))]);
        let err = registry
            .encode_data(&value, Some(&Typedef::new("array")))
            .unwrap_err();
        assert_eq!(err, TypeError::mismatch("array", "object"));
    }

    #[test]
    fn test_element_typedef_mismatch_is_type_error() {
        let registry = TypeRegistry::with_defaults();
        let typedef = Typedef::new("array").with("items", json!([{"type": "string"}]));
        let err = registry
            .encode_data(&Value::Array(vec![Value::Int(1)]), Some(&typedef))
            .unwrap_err();
        assert_eq!(err, TypeError::mismatch("string", "int"));
    }

    #[test]
    fn test_decode_unregistered_type() {
        let registry = TypeRegistry::with_defaults();
        let err = registry
            .decode_data(&json!(1), &Typedef::new("complex"))
            .unwrap_err();
        assert_eq!(err, TypeError::UnknownType("complex".to_string()));
    }

    #[test]
    fn test_complete_typedef_forms() {
        let registry = TypeRegistry::with_defaults();
        assert_eq!(registry.complete_typedef(&json!("int")).unwrap(), Typedef::new("int"));

        let completed = registry
            .complete_typedef(&json!({"type": "object", "properties": {"x": "float"}}))
            .unwrap();
        assert_eq!(
            completed.to_json(),
            json!({"type": "object", "properties": {"x": {"type": "float"}}})
        );

        let empty = registry.complete_typedef(&json!({"type": "array"})).unwrap();
        assert_eq!(empty.get("items"), Some(&json!([])));

        assert!(matches!(
            registry.complete_typedef(&json!({"items": []})),
            Err(TypeError::MissingType(_))
        ));
        assert!(matches!(
            registry.complete_typedef(&json!(5)),
            Err(TypeError::InvalidTypedef(_))
        ));
    }

    #[test]
    fn test_extract_typedef_drops_metadata() {
        let registry = TypeRegistry::with_defaults();
        let metadata = Typedef::from_json(&json!({
            "type": "object",
            "units": "cm",
            "properties": {"a": {"type": "int", "title": "first"}}
        }))
        .unwrap();
        let extracted = registry.extract_typedef(&metadata).unwrap();
        assert_eq!(
            extracted.to_json(),
            json!({"type": "object", "properties": {"a": {"type": "int"}}})
        );
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let registry = TypeRegistry::with_defaults();
        let schema = Typedef::from_json(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "length": 3},
                "count": {"type": "float"},
                "tags": {"type": "array", "items": [{"type": "string"}]}
            }
        }))
        .unwrap();
        let instance = Value::object([
            ("name", Value::from("sensor")),
            ("count", Value::from(true)),
            ("tags", Value::Array(vec![Value::Int(1)])),
        ]);

        let errors = registry.validate_instance(&instance, &schema).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.messages().iter().any(|m| m.starts_with("name:")));
        assert!(errors.messages().iter().any(|m| m.starts_with("count:")));
        assert!(errors.messages().iter().any(|m| m.starts_with("tags: [0]:")));
    }

    #[test]
    fn test_validate_accepts_matching_instance() {
        let registry = TypeRegistry::with_defaults();
        let value = nested_value();
        let schema = registry.encode_type(&value).unwrap();
        assert!(registry.validate_instance(&value, &schema).is_ok());
    }

    #[test]
    fn test_global_registry_shared() {
        let class = get_type_class("object").unwrap();
        assert_eq!(class.name(), "object");
        assert!(std::ptr::eq(global(), global()));
    }
}
