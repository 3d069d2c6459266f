//! Type classes
//!
//! Each type class knows how to turn a native [`Value`] into its encoded JSON
//! form and back, guided by a [`Typedef`]. Scalars live in [`scalar`]; the
//! two container kinds share one generic traversal in [`container`].

pub mod container;
pub mod scalar;

pub use container::{ArrayKind, ArrayType, ContainerKind, ContainerType, Node, ObjectKind, ObjectType};
pub use scalar::{ScalarKind, ScalarType};

use crate::registry::TypeRegistry;
use crate::{JsonValue, TypeError, Typedef, Value};

/// A registered type class
///
/// Type classes are stateless and live for the whole process inside a
/// [`TypeRegistry`]. Every method that may need to recurse into child
/// elements receives the registry so that it can dispatch by type name.
pub trait MetaschemaType: Send + Sync {
    /// Unique name the class is registered under
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// Typedef properties, besides `type`, that define this type
    fn definition_properties(&self) -> &'static [&'static str] {
        &[]
    }

    /// Returns true if the native value belongs to this type
    fn accepts(&self, value: &Value) -> bool;

    /// Infers the typedef that describes a value of this type
    fn encode_type(&self, _value: &Value, _registry: &TypeRegistry) -> Result<Typedef, TypeError> {
        Ok(Typedef::new(self.name()))
    }

    /// Encodes a native value
    fn encode_data(
        &self,
        value: &Value,
        typedef: Option<&Typedef>,
        registry: &TypeRegistry,
    ) -> Result<JsonValue, TypeError>;

    /// Decodes an encoded value
    fn decode_data(
        &self,
        encoded: &JsonValue,
        typedef: &Typedef,
        registry: &TypeRegistry,
    ) -> Result<Value, TypeError>;

    /// Reduces message metadata to the minimal typedef for this type
    fn extract_typedef(
        &self,
        metadata: &Typedef,
        _registry: &TypeRegistry,
    ) -> Result<Typedef, TypeError> {
        let mut out = Typedef::new(self.name());
        for key in self.definition_properties() {
            if let Some(value) = metadata.get(key) {
                out.insert(*key, value.clone());
            }
        }
        Ok(out)
    }

    /// Fills in whatever a partial typedef of this type leaves implicit
    fn complete_typedef(
        &self,
        typedef: Typedef,
        _registry: &TypeRegistry,
    ) -> Result<Typedef, TypeError> {
        Ok(typedef)
    }

    /// Merges an inferred typedef of this type into a declared one
    fn fill_typedef(
        &self,
        declared: Typedef,
        _inferred: &Typedef,
        _registry: &TypeRegistry,
    ) -> Result<Typedef, TypeError> {
        Ok(declared)
    }
}
