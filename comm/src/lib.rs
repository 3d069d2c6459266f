//! # Comm
//!
//! One endpoint interface over several transports.
//!
//! ## Philosophy
//!
//! - **One contract, closed set of backends**: Buffer, file and broker
//!   transports all sit behind [`Comm`]; the kind is a tag validated at
//!   construction
//! - **Flags for the stream, errors for the setup**: Construction fails fast
//!   with [`CommError::Config`]; `send`/`recv` report failure as `false`
//! - **EOF is a message**: Sending or receiving the sentinel closes the
//!   comm, and `is_closed` tells end of stream apart from failure
//!
//! ## Example
//!
//! ```
//! use comm::{Comm, CommConfig};
//! use ipc::{Direction, Message};
//!
//! let tx = Comm::new(CommConfig::buffer("greetings", Direction::Send)).unwrap();
//! let rx = Comm::new(tx.opp_config()).unwrap();
//! assert!(tx.send(&Message::new("hello")));
//! let (ok, message) = rx.recv(None);
//! assert!(ok);
//! assert_eq!(message.body, b"hello");
//! ```

mod async_broker;
pub mod broker;
pub mod buffer;
mod comm;
pub mod config;
pub mod error;
mod file;
pub mod rpc;
pub mod sync;
mod transport;

pub use broker::{BrokerClient, DisconnectCallback, LocalBroker, LocalConnection};
pub use comm::Comm;
pub use config::{
    BackendOptions, BrokerOptions, CommConfig, CommKind, FileOptions, ReadMethod,
    ReconnectConfig, DEFAULT_RECV_TIMEOUT_MS,
};
pub use error::CommError;
pub use rpc::{ClientComm, ServerComm};
