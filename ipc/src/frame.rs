//! Wire framing
//!
//! Converts a [`Message`] to the bytes a transport carries and back.

use crate::message::{Header, Message};
use crate::sentinel::MSG_HEAD;
use thiserror::Error;

/// Errors decoding or encoding a frame
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Header opened but never closed")]
    UnterminatedHeader,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Encodes a message into a frame
///
/// A message with an empty header is sent as its bare body.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, FrameError> {
    if message.header.is_empty() {
        return Ok(message.body.clone());
    }
    let header = serde_json::to_vec(&message.header)
        .map_err(|err| FrameError::InvalidHeader(err.to_string()))?;

    let mut frame = Vec::with_capacity(2 * MSG_HEAD.len() + header.len() + message.body.len());
    frame.extend_from_slice(MSG_HEAD);
    frame.extend_from_slice(&header);
    frame.extend_from_slice(MSG_HEAD);
    frame.extend_from_slice(&message.body);
    Ok(frame)
}

/// Decodes a frame into a message
pub fn decode_frame(frame: &[u8]) -> Result<Message, FrameError> {
    let rest = match frame.strip_prefix(MSG_HEAD) {
        Some(rest) => rest,
        None => return Ok(Message::new(frame)),
    };
    let end = find(rest, MSG_HEAD).ok_or(FrameError::UnterminatedHeader)?;
    let header: Header = serde_json::from_slice(&rest[..end])
        .map_err(|err| FrameError::InvalidHeader(err.to_string()))?;
    let body = rest[end + MSG_HEAD.len()..].to_vec();
    Ok(Message { header, body })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
