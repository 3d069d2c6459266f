//! Transport seam
//!
//! Every backend moves opaque frames. Framing, EOF bookkeeping and chunking
//! happen above this layer in [`crate::Comm`].

use crate::async_broker::AsyncBrokerTransport;
use crate::broker::BrokerTransport;
use crate::buffer::BufferTransport;
use crate::config::{BackendOptions, CommConfig};
use crate::error::CommError;
use crate::file::FileTransport;
use core_types::CommAddress;
use ipc::EOF_MSG;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Frame-level operations a backend provides
pub(crate) trait Transport: Send {
    /// Sends one frame
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), CommError>;

    /// Waits up to `timeout` for one frame
    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CommError>;

    /// Marks the end of the stream
    fn send_eof(&mut self) -> Result<(), CommError> {
        self.send_frame(EOF_MSG.to_vec())
    }

    /// Frames waiting to be received
    fn pending(&self) -> usize;

    /// Releases the transport's resources
    fn close(&mut self);
}

/// The closed set of backends
pub(crate) enum Backend {
    Buffer(BufferTransport),
    File(FileTransport),
    Broker(BrokerTransport),
    AsyncBroker(AsyncBrokerTransport),
}

impl Backend {
    /// Opens the backend a configuration names
    ///
    /// `open` is the owning comm's open flag; blocking backends stop waiting
    /// once it is cleared.
    pub(crate) fn open(
        config: &CommConfig,
        address: &CommAddress,
        open: &Arc<AtomicBool>,
    ) -> Result<Self, CommError> {
        let backend = match config.backend_options() {
            BackendOptions::Buffer => Backend::Buffer(BufferTransport::open(address, config.direction)),
            BackendOptions::File(options) => {
                Backend::File(FileTransport::open(address, config.direction, options)?)
            }
            BackendOptions::Broker(options) => {
                Backend::Broker(BrokerTransport::open(address, options, Arc::clone(open))?)
            }
            BackendOptions::AsyncBroker(options) => Backend::AsyncBroker(
                AsyncBrokerTransport::open(&config.name, address, config.direction, options)?,
            ),
        };
        Ok(backend)
    }

    fn transport(&mut self) -> &mut dyn Transport {
        match self {
            Backend::Buffer(t) => t,
            Backend::File(t) => t,
            Backend::Broker(t) => t,
            Backend::AsyncBroker(t) => t,
        }
    }

    pub(crate) fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), CommError> {
        self.transport().send_frame(frame)
    }

    pub(crate) fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CommError> {
        self.transport().recv_frame(timeout)
    }

    pub(crate) fn send_eof(&mut self) -> Result<(), CommError> {
        self.transport().send_eof()
    }

    pub(crate) fn pending(&self) -> usize {
        match self {
            Backend::Buffer(t) => t.pending(),
            Backend::File(t) => t.pending(),
            Backend::Broker(t) => t.pending(),
            Backend::AsyncBroker(t) => t.pending(),
        }
    }

    pub(crate) fn close(&mut self) {
        self.transport().close()
    }

    /// Number of successful broker connections, for broker backends
    pub(crate) fn times_connected(&self) -> Option<u64> {
        match self {
            Backend::Broker(t) => Some(t.times_connected()),
            Backend::AsyncBroker(t) => Some(t.times_connected()),
            Backend::Buffer(_) | Backend::File(_) => None,
        }
    }
}
