//! Metaschema error types

use std::fmt;
use thiserror::Error;

/// Errors raised while resolving, encoding or decoding types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TypeError {
    /// No type class registered under this name
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A type class with this name is already registered
    #[error("Type already registered: {0}")]
    AlreadyRegistered(String),

    /// A typedef has no `type` entry where one is required
    #[error("Typedef is missing the 'type' property: {0}")]
    MissingType(String),

    /// A typedef is not shaped like a typedef
    #[error("Invalid typedef: {0}")]
    InvalidTypedef(String),

    /// The value does not belong to the declared type
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The value cannot be represented in encoded form
    #[error("Failed to encode {type_name}: {reason}")]
    Encode { type_name: String, reason: String },

    /// The encoded data does not match the typedef
    #[error("Failed to decode {type_name}: {reason}")]
    Decode { type_name: String, reason: String },
}

impl TypeError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn encode(type_name: &str, reason: impl Into<String>) -> Self {
        Self::Encode {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(type_name: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Every violation found while validating one instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    messages: Vec<String>,
}

impl ValidationErrors {
    /// Creates an empty error set
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one violation
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Records violations found under a nested element
    pub fn extend_at(&mut self, path: &str, messages: impl IntoIterator<Item = String>) {
        self.messages
            .extend(messages.into_iter().map(|m| format!("{}: {}", path, m)));
    }

    /// Returns true if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the number of violations
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns the violation messages
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Converts into a result, `Ok` when nothing was recorded
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.messages.len())?;
        for message in &self.messages {
            write!(f, "\n  - {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_aggregate() {
        let mut errors = ValidationErrors::new();
        assert!(errors.is_empty());
        errors.push("first");
        errors.extend_at("[1]", vec!["second".to_string()]);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.messages()[1], "[1]: second");
        let display = errors.to_string();
        assert!(display.starts_with("2 validation error(s)"));
        assert!(display.contains("first"));
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn test_type_error_display() {
        let err = TypeError::mismatch("array", "object");
        assert_eq!(err.to_string(), "Type mismatch: expected array, found object");
    }
}
