//! # Drivers
//!
//! Connection drivers: threads that pump messages between comms.
//!
//! ## Philosophy
//!
//! - **One pump, many behaviors**: Every driver is a [`ConnectionDriver`]
//!   with a [`MessageHandler`] plugged in
//! - **Models only see buffers**: A driver owns the remote-facing comm and
//!   hands the model a buffer address through its environment
//! - **EOF is shutdown**: A driver stops once it forwards EOF; the server
//!   request driver only forwards it after its last client signs off
//!
//! ## Key Types
//!
//! - [`ConnectionDriver`]: The pump, with its lifecycle
//! - [`ServerRequestDriver`] / [`ServerResponseDriver`]: Server side of RPC
//! - [`ClientRequestDriver`] / [`ClientResponseDriver`]: Client side of RPC
//! - [`FileInputDriver`], [`FileOutputDriver`], [`BrokerInputDriver`],
//!   [`BrokerOutputDriver`]: Plain bridges to other transports

pub mod broker;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod file;
pub mod server;

pub use broker::{BrokerInputDriver, BrokerOutputDriver};
pub use client::{ClientRequestDriver, ClientResponseDriver};
pub use config::DriverConfig;
pub use connection::{
    ConnectionDriver, DriverBuilder, DriverContext, DriverState, EofAction, Flow, MessageHandler,
    Passthrough,
};
pub use error::DriverError;
pub use file::{FileInputDriver, FileOutputDriver};
pub use server::{ServerRequestDriver, ServerResponseDriver};
