//! Driver error types

use comm::CommError;
use thiserror::Error;

/// Errors that stop a driver
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    /// The driver cannot be built from its configuration
    #[error("Invalid driver configuration: {0}")]
    Config(String),

    /// A comm the driver owns could not be opened or used
    #[error("Comm error: {0}")]
    Comm(#[from] CommError),

    /// The peer broke the request/response protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Receives kept failing for the whole retry window
    #[error("Timed out after {0} ms")]
    Timeout(u64),
}
