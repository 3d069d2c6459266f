//! # Metaschema
//!
//! A registry-driven type system for message payloads.
//!
//! ## Philosophy
//!
//! - **Typedefs travel with data**: Every encoded payload can be described by
//!   a [`Typedef`], a JSON object naming the type and its properties.
//! - **One dispatcher**: Encoding and decoding always go through the
//!   [`TypeRegistry`], which looks up the type class by name and delegates.
//!   Containers recurse through the same dispatcher for their elements.
//! - **Aggregate validation**: Property checks yield every violation as a
//!   message string rather than stopping at the first.
//!
//! ## Layout
//!
//! - [`Value`]: the native, in-process representation of a payload
//! - [`types`]: scalar and container type classes
//! - [`registry`]: the process-wide name to type-class mapping
//! - [`properties`]: schema properties used for validation

pub mod error;
pub mod properties;
pub mod registry;
pub mod typedef;
pub mod types;
pub mod value;

pub use error::{TypeError, ValidationErrors};
pub use properties::{LengthProperty, MetaschemaProperty, TypeProperty};
pub use registry::{
    complete_typedef, decode_data, encode_data, encode_with_typedef, extract_typedef,
    get_type_class, global, init_global, validate_instance, TypeRegistry,
};
pub use typedef::Typedef;
pub use types::{
    ArrayKind, ContainerKind, ContainerType, MetaschemaType, ObjectKind, ScalarKind, ScalarType,
};
pub use value::Value;

/// Encoded form of a payload: plain JSON.
pub type JsonValue = serde_json::Value;
