//! # Inter-Process Communication (IPC)
//!
//! This crate defines the wire-level pieces every comm shares.
//!
//! ## Philosophy
//!
//! - **Bytes on the wire, metadata in a header**: A message is an opaque
//!   body plus an optional JSON header
//! - **Sentinels are messages**: End-of-stream and client sign-on travel as
//!   ordinary frames so every transport carries them the same way
//! - **Unknown header fields survive**: Peers may add fields this crate does
//!   not know about; they are preserved on re-encode
//!
//! ## Architecture
//!
//! A frame is either a raw body, or a header enclosed by two
//! [`MSG_HEAD`] markers followed by the body:
//!
//! ```text
//! YGG_MSG_HEAD{"id":"r1","response_address":"a1b2"}YGG_MSG_HEADhello
//! ```

pub mod channel;
pub mod frame;
pub mod message;
pub mod sentinel;

pub use channel::Direction;
pub use frame::{decode_frame, encode_frame, FrameError};
pub use message::{Header, Message};
pub use sentinel::{CLIENT_SIGNON, DEFAULT_MAX_MSG_SIZE, EOF_MSG, MSG_HEAD, RESPONSE_EOF};
