//! # Core Types
//!
//! This crate defines the identifiers shared by every layer of Conduit.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: An address is never confused with a request ID.
//! - **Stringly on the wire, typed in code**: Identifiers serialize as plain
//!   strings so peers written in other languages can read them, but inside
//!   the process each one has its own type.
//!
//! ## Key Types
//!
//! - [`CommAddress`]: Where a comm endpoint can be reached
//! - [`RequestId`]: Correlates a request with its eventual response
//! - [`DriverId`]: Unique identifier for a running connection driver

pub mod ids;
pub mod uuid_tools;

pub use ids::{CommAddress, DriverId, RequestId};
pub use uuid_tools::{new_uuid, short_token};
