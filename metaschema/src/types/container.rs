//! Container type classes
//!
//! Arrays and objects share one traversal. A [`ContainerKind`] supplies the
//! four structural hooks (iterate, assign, has, get) and [`ContainerType`]
//! runs the kind-agnostic encode/decode algorithm on top of them. The hooks
//! are generic over [`Node`] so the same code walks native [`Value`]s, their
//! encoded JSON, and the child typedef collections.

use super::MetaschemaType;
use crate::registry::TypeRegistry;
use crate::{JsonValue, TypeError, Typedef, Value};
use serde_json::Map;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// A tree node that may be a sequence or a string-keyed map
pub trait Node: Sized {
    fn empty_seq() -> Self;
    fn empty_map() -> Self;
    fn as_seq(&self) -> Option<&[Self]>;
    fn as_seq_mut(&mut self) -> Option<&mut Vec<Self>>;
    fn map_entries(&self) -> Option<Vec<(&str, &Self)>>;
    fn map_get(&self, key: &str) -> Option<&Self>;
    fn map_insert(&mut self, key: String, value: Self);
}

impl Node for Value {
    fn empty_seq() -> Self {
        Value::Array(Vec::new())
    }

    fn empty_map() -> Self {
        Value::Object(BTreeMap::new())
    }

    fn as_seq(&self) -> Option<&[Self]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    fn as_seq_mut(&mut self) -> Option<&mut Vec<Self>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    fn map_entries(&self) -> Option<Vec<(&str, &Self)>> {
        match self {
            Value::Object(map) => Some(map.iter().map(|(k, v)| (k.as_str(), v)).collect()),
            _ => None,
        }
    }

    fn map_get(&self, key: &str) -> Option<&Self> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    fn map_insert(&mut self, key: String, value: Self) {
        if let Value::Object(map) = self {
            map.insert(key, value);
        }
    }
}

impl Node for JsonValue {
    fn empty_seq() -> Self {
        JsonValue::Array(Vec::new())
    }

    fn empty_map() -> Self {
        JsonValue::Object(Map::new())
    }

    fn as_seq(&self) -> Option<&[Self]> {
        self.as_array().map(Vec::as_slice)
    }

    fn as_seq_mut(&mut self) -> Option<&mut Vec<Self>> {
        self.as_array_mut()
    }

    fn map_entries(&self) -> Option<Vec<(&str, &Self)>> {
        self.as_object()
            .map(|map| map.iter().map(|(k, v)| (k.as_str(), v)).collect())
    }

    fn map_get(&self, key: &str) -> Option<&Self> {
        self.as_object().and_then(|map| map.get(key))
    }

    fn map_insert(&mut self, key: String, value: Self) {
        if let Some(map) = self.as_object_mut() {
            map.insert(key, value);
        }
    }
}

/// Structural hooks for one kind of container
pub trait ContainerKind: Send + Sync + 'static {
    /// Position of an element inside the container
    type Index: Clone + fmt::Display;

    /// Registered type name
    const NAME: &'static str;
    /// Human-readable description
    const DESCRIPTION: &'static str;
    /// Typedef property holding the per-element typedefs
    const JSON_PROPERTY: &'static str;
    /// Definition properties of the container type
    const DEFINITION_PROPERTIES: &'static [&'static str];

    /// Creates an empty container of this kind
    fn empty<N: Node>() -> N;

    /// Lists `(index, element)` pairs, or `None` if the node is another kind
    fn iterate<N: Node>(container: &N) -> Option<Vec<(Self::Index, &N)>>;

    /// Stores an element at an index
    fn assign<N: Node>(container: &mut N, index: Self::Index, value: N);

    /// Returns the element at an index, if present
    fn get_element<'a, N: Node>(container: &'a N, index: &Self::Index) -> Option<&'a N>;

    /// Returns true if the index is present
    fn has_element<N: Node>(container: &N, index: &Self::Index) -> bool {
        Self::get_element(container, index).is_some()
    }
}

/// Sequence container, typedef children under `items`
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayKind;

impl ContainerKind for ArrayKind {
    type Index = usize;

    const NAME: &'static str = "array";
    const DESCRIPTION: &'static str = "A container of ordered values.";
    const JSON_PROPERTY: &'static str = "items";
    const DEFINITION_PROPERTIES: &'static [&'static str] = &["items"];

    fn empty<N: Node>() -> N {
        N::empty_seq()
    }

    fn iterate<N: Node>(container: &N) -> Option<Vec<(usize, &N)>> {
        container
            .as_seq()
            .map(|items| items.iter().enumerate().collect())
    }

    fn assign<N: Node>(container: &mut N, index: usize, value: N) {
        if let Some(items) = container.as_seq_mut() {
            if index < items.len() {
                items[index] = value;
            } else {
                items.push(value);
            }
        }
    }

    fn get_element<'a, N: Node>(container: &'a N, index: &usize) -> Option<&'a N> {
        container.as_seq().and_then(|items| items.get(*index))
    }
}

/// Ordered map container, typedef children under `properties`
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectKind;

impl ContainerKind for ObjectKind {
    type Index = String;

    const NAME: &'static str = "object";
    const DESCRIPTION: &'static str = "A container mapping between keys and values.";
    const JSON_PROPERTY: &'static str = "properties";
    const DEFINITION_PROPERTIES: &'static [&'static str] = &["properties"];

    fn empty<N: Node>() -> N {
        N::empty_map()
    }

    fn iterate<N: Node>(container: &N) -> Option<Vec<(String, &N)>> {
        container
            .map_entries()
            .map(|entries| entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    fn assign<N: Node>(container: &mut N, index: String, value: N) {
        container.map_insert(index, value);
    }

    fn get_element<'a, N: Node>(container: &'a N, index: &String) -> Option<&'a N> {
        container.map_get(index)
    }
}

/// Type class for a container kind
pub struct ContainerType<K: ContainerKind> {
    _kind: PhantomData<fn() -> K>,
}

/// Type class for arrays
pub type ArrayType = ContainerType<ArrayKind>;

/// Type class for objects
pub type ObjectType = ContainerType<ObjectKind>;

impl<K: ContainerKind> ContainerType<K> {
    /// Creates the type class
    pub fn new() -> Self {
        Self {
            _kind: PhantomData,
        }
    }

    fn elements<'a, N: Node>(
        &self,
        container: &'a N,
        found: &str,
    ) -> Result<Vec<(K::Index, &'a N)>, TypeError> {
        K::iterate(container).ok_or_else(|| TypeError::mismatch(K::NAME, found))
    }

    /// Child typedef for one element, if the container typedef declares it
    fn child_typedef(
        typedef: Option<&Typedef>,
        index: &K::Index,
    ) -> Result<Option<Typedef>, TypeError> {
        let children = match typedef.and_then(|t| t.get(K::JSON_PROPERTY)) {
            Some(children) => children,
            None => return Ok(None),
        };
        K::get_element(children, index)
            .map(Typedef::from_json)
            .transpose()
    }
}

impl<K: ContainerKind> Default for ContainerType<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ContainerKind> fmt::Debug for ContainerType<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerType({})", K::NAME)
    }
}

impl<K: ContainerKind> MetaschemaType for ContainerType<K> {
    fn name(&self) -> &'static str {
        K::NAME
    }

    fn description(&self) -> &'static str {
        K::DESCRIPTION
    }

    fn definition_properties(&self) -> &'static [&'static str] {
        K::DEFINITION_PROPERTIES
    }

    fn accepts(&self, value: &Value) -> bool {
        K::iterate(value).is_some()
    }

    fn encode_type(&self, value: &Value, registry: &TypeRegistry) -> Result<Typedef, TypeError> {
        let mut children: JsonValue = K::empty();
        for (index, element) in self.elements(value, value.type_name())? {
            let child = registry.encode_type(element)?;
            K::assign(&mut children, index, child.to_json());
        }
        Ok(Typedef::new(K::NAME).with(K::JSON_PROPERTY, children))
    }

    fn encode_data(
        &self,
        value: &Value,
        typedef: Option<&Typedef>,
        registry: &TypeRegistry,
    ) -> Result<JsonValue, TypeError> {
        let mut container: JsonValue = K::empty();
        for (index, element) in self.elements(value, value.type_name())? {
            let child = Self::child_typedef(typedef, &index)?;
            let encoded = registry.encode_data(element, child.as_ref())?;
            K::assign(&mut container, index, encoded);
        }
        Ok(container)
    }

    fn decode_data(
        &self,
        encoded: &JsonValue,
        typedef: &Typedef,
        registry: &TypeRegistry,
    ) -> Result<Value, TypeError> {
        let elements = K::iterate(encoded).ok_or_else(|| {
            TypeError::decode(K::NAME, format!("unexpected encoded value {}", encoded))
        })?;
        let mut container: Value = K::empty();
        for (index, element) in elements {
            let child = Self::child_typedef(Some(typedef), &index)?.unwrap_or_default();
            let decoded = registry.decode_data(element, &child)?;
            K::assign(&mut container, index, decoded);
        }
        Ok(container)
    }

    fn extract_typedef(
        &self,
        metadata: &Typedef,
        registry: &TypeRegistry,
    ) -> Result<Typedef, TypeError> {
        let mut out = Typedef::new(K::NAME);
        if let Some(children) = metadata.get(K::JSON_PROPERTY) {
            let mut extracted: JsonValue = K::empty();
            for (index, child) in self.elements(children, "non-container")? {
                let child = Typedef::from_json(child)?;
                let child = if child.type_name().is_some() {
                    registry.extract_typedef(&child)?
                } else {
                    child
                };
                K::assign(&mut extracted, index, child.to_json());
            }
            out.insert(K::JSON_PROPERTY, extracted);
        }
        Ok(out)
    }

    fn complete_typedef(
        &self,
        mut typedef: Typedef,
        registry: &TypeRegistry,
    ) -> Result<Typedef, TypeError> {
        let children = match typedef.remove(K::JSON_PROPERTY) {
            Some(children) => children,
            None => K::empty(),
        };
        let mut completed: JsonValue = K::empty();
        for (index, child) in self.elements(&children, "non-container")? {
            let child = registry.complete_typedef(child)?;
            K::assign(&mut completed, index, child.to_json());
        }
        typedef.insert(K::JSON_PROPERTY, completed);
        Ok(typedef)
    }

    fn fill_typedef(
        &self,
        mut declared: Typedef,
        inferred: &Typedef,
        registry: &TypeRegistry,
    ) -> Result<Typedef, TypeError> {
        let inferred_children = match inferred.get(K::JSON_PROPERTY) {
            Some(children) => children,
            None => return Ok(declared),
        };
        let mut children = declared.remove(K::JSON_PROPERTY).unwrap_or_else(K::empty);
        for (index, child) in self.elements(inferred_children, "non-container")? {
            let filled = match K::get_element(&children, &index) {
                Some(existing) => registry
                    .fill_typedef(Typedef::from_json(existing)?, &Typedef::from_json(child)?)?
                    .to_json(),
                None => child.clone(),
            };
            K::assign(&mut children, index, filled);
        }
        declared.insert(K::JSON_PROPERTY, children);
        Ok(declared)
    }
}
