//! Comm error types

use ipc::FrameError;
use metaschema::TypeError;
use thiserror::Error;

/// Errors raised by comms and their transports
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommError {
    /// The comm cannot be built from its configuration
    #[error("Invalid comm configuration: {0}")]
    Config(String),

    /// The comm was used after it closed
    #[error("Comm closed: {0}")]
    Closed(String),

    /// An operation did not finish in time
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The underlying transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The broker connection dropped
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// A received frame could not be decoded
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// A typed payload could not be encoded or decoded
    #[error("Type error: {0}")]
    Type(#[from] TypeError),
}

impl CommError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        Self::Transport(format!("{}: {}", context, err))
    }
}
