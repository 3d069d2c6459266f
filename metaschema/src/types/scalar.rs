//! Scalar type classes

use super::MetaschemaType;
use crate::registry::TypeRegistry;
use crate::{JsonValue, TypeError, Typedef, Value};
use serde_json::Number;

/// The scalar kinds understood by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Null,
    Boolean,
    Int,
    Uint,
    Float,
    String,
    Bytes,
}

impl ScalarKind {
    /// Every scalar kind, in registration order
    pub const ALL: [ScalarKind; 7] = [
        ScalarKind::Null,
        ScalarKind::Boolean,
        ScalarKind::Int,
        ScalarKind::Uint,
        ScalarKind::Float,
        ScalarKind::String,
        ScalarKind::Bytes,
    ];
}

/// Type class for a single scalar kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarType {
    kind: ScalarKind,
}

impl ScalarType {
    /// Creates the type class for a kind
    pub const fn new(kind: ScalarKind) -> Self {
        Self { kind }
    }

    /// Returns the scalar kind
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    fn decode_error(&self, encoded: &JsonValue) -> TypeError {
        TypeError::decode(self.name(), format!("unexpected encoded value {}", encoded))
    }
}

impl MetaschemaType for ScalarType {
    fn name(&self) -> &'static str {
        match self.kind {
            ScalarKind::Null => "null",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Int => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Float => "float",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            ScalarKind::Null => "The absence of a value.",
            ScalarKind::Boolean => "A true or false value.",
            ScalarKind::Int => "A signed 64-bit integer.",
            ScalarKind::Uint => "An unsigned 64-bit integer.",
            ScalarKind::Float => "A 64-bit floating point number.",
            ScalarKind::String => "A UTF-8 string.",
            ScalarKind::Bytes => "A byte string, encoded as UTF-8 text.",
        }
    }

    fn definition_properties(&self) -> &'static [&'static str] {
        match self.kind {
            ScalarKind::String | ScalarKind::Bytes => &["length"],
            _ => &[],
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self.kind, value),
            (ScalarKind::Null, Value::Null)
                | (ScalarKind::Boolean, Value::Boolean(_))
                | (ScalarKind::Int, Value::Int(_))
                | (ScalarKind::Uint, Value::Uint(_))
                | (ScalarKind::Float, Value::Float(_))
                | (ScalarKind::String, Value::String(_))
                | (ScalarKind::Bytes, Value::Bytes(_))
        )
    }

    fn encode_data(
        &self,
        value: &Value,
        _typedef: Option<&Typedef>,
        _registry: &TypeRegistry,
    ) -> Result<JsonValue, TypeError> {
        match value {
            Value::Null if self.accepts(value) => Ok(JsonValue::Null),
            Value::Boolean(b) if self.accepts(value) => Ok(JsonValue::Bool(*b)),
            Value::Int(i) if self.accepts(value) => Ok(JsonValue::from(*i)),
            Value::Uint(u) if self.accepts(value) => Ok(JsonValue::from(*u)),
            Value::Float(f) if self.accepts(value) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| TypeError::encode(self.name(), format!("{} is not finite", f))),
            Value::String(s) if self.accepts(value) => Ok(JsonValue::String(s.clone())),
            Value::Bytes(b) if self.accepts(value) => String::from_utf8(b.clone())
                .map(JsonValue::String)
                .map_err(|_| TypeError::encode(self.name(), "bytes are not valid UTF-8")),
            other => Err(TypeError::mismatch(self.name(), other.type_name())),
        }
    }

    fn decode_data(
        &self,
        encoded: &JsonValue,
        _typedef: &Typedef,
        _registry: &TypeRegistry,
    ) -> Result<Value, TypeError> {
        let decoded = match self.kind {
            ScalarKind::Null => encoded.is_null().then_some(Value::Null),
            ScalarKind::Boolean => encoded.as_bool().map(Value::Boolean),
            ScalarKind::Int => encoded.as_i64().map(Value::Int),
            ScalarKind::Uint => encoded.as_u64().map(Value::Uint),
            ScalarKind::Float => encoded.as_f64().map(Value::Float),
            ScalarKind::String => encoded.as_str().map(|s| Value::String(s.to_string())),
            ScalarKind::Bytes => encoded.as_str().map(|s| Value::Bytes(s.as_bytes().to_vec())),
        };
        decoded.ok_or_else(|| self.decode_error(encoded))
    }
}
