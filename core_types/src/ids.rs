//! Unique identifiers for comm endpoints, requests and drivers

use crate::uuid_tools::{new_uuid, short_token};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Address of a comm endpoint
///
/// The meaning of the string depends on the transport: a buffer key for
/// in-memory queues, a path for files, a queue name for brokers. Two comms
/// constructed with the same kind and address talk to each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommAddress(String);

impl CommAddress {
    /// Creates an address from an explicit string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Generates a fresh, process-unique address
    pub fn generate() -> Self {
        Self(short_token())
    }

    /// Returns the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CommAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier attached to every request header
///
/// Generated by the requesting side and echoed back on the reply so the
/// requester can correlate the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new random request ID
    pub fn new() -> Self {
        Self(new_uuid().to_string())
    }

    /// Wraps an ID received from a peer
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request({})", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

/// Unique identifier for a connection driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverId(Uuid);

impl DriverId {
    /// Creates a new random driver ID
    pub fn new() -> Self {
        Self(new_uuid())
    }

    /// Creates a driver ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DriverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Driver({})", self.0)
    }
}
