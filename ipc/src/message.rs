//! Message and header types

use crate::sentinel::{CLIENT_SIGNON, EOF_MSG, RESPONSE_EOF};
use core_types::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Metadata carried ahead of a message body
///
/// Fields this crate knows about are typed; anything else a peer put in the
/// header lands in `extra` and is written back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Identifier correlating a request with its reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Where the reply to this request should be sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_address: Option<String>,
    /// Total body size when the body follows in chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Work channel address the chunks are sent on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Typedef of a typed payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<JsonValue>,
    /// Fields not known to this crate
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Header {
    /// Creates an empty header
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request ID
    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the response address
    pub fn with_response_address(mut self, address: impl Into<String>) -> Self {
        self.response_address = Some(address.into());
        self
    }

    /// Sets the payload typedef
    pub fn with_datatype(mut self, datatype: JsonValue) -> Self {
        self.datatype = Some(datatype);
        self
    }

    /// Sets an extra field
    pub fn with_extra(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Checks if the header carries nothing
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.response_address.is_none()
            && self.size.is_none()
            && self.address.is_none()
            && self.datatype.is_none()
            && self.extra.is_empty()
    }

    /// Checks if the sender expects no reply
    pub fn is_sign_off(&self) -> bool {
        self.response_address.as_deref() == Some(RESPONSE_EOF)
    }

    /// Checks if this header announces a body sent in chunks
    pub fn announces_chunks(&self, body_len: usize) -> bool {
        matches!(self.size, Some(size) if size > body_len) && self.address.is_some()
    }
}

/// A message: header plus opaque body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Message metadata
    pub header: Header,
    /// Payload bytes
    pub body: Vec<u8>,
}

impl Message {
    /// Creates a message with an empty header
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            header: Header::default(),
            body: body.into(),
        }
    }

    /// Creates a message with no body and no header
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates the end-of-stream message
    pub fn eof() -> Self {
        Self::new(EOF_MSG)
    }

    /// Creates the message a client sends once when it starts
    pub fn sign_on() -> Self {
        Self::new(CLIENT_SIGNON)
    }

    /// Creates the end-of-stream message a client sends when it stops
    pub fn sign_off() -> Self {
        Self::eof().with_header(Header::new().with_response_address(RESPONSE_EOF))
    }

    /// Replaces the header
    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    /// Sets the request ID
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.header.id = Some(id.into());
        self
    }

    /// Checks if this is the end-of-stream sentinel
    pub fn is_eof(&self) -> bool {
        self.body == EOF_MSG
    }

    /// Checks if this is a client sign-on
    pub fn is_sign_on(&self) -> bool {
        self.body == CLIENT_SIGNON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_skips_unset_fields() {
        let header = Header::new().with_id(RequestId::from_string("r1"));
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json, json!({"id": "r1"}));
    }

    #[test]
    fn test_header_preserves_unknown_fields() {
        let raw = json!({
            "id": "r1",
            "response_address": "abc",
            "model": "growth",
            "nested": {"x": [1, 2]}
        });
        let header: Header = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(header.id, Some(RequestId::from_string("r1")));
        assert_eq!(header.extra.get("model"), Some(&json!("growth")));
        assert_eq!(serde_json::to_value(&header).unwrap(), raw);
    }

    #[test]
    fn test_sentinel_messages() {
        assert!(Message::eof().is_eof());
        assert!(Message::sign_on().is_sign_on());
        assert!(!Message::new("hello").is_eof());

        let sign_off = Message::sign_off();
        assert!(sign_off.is_eof());
        assert!(sign_off.header.is_sign_off());
    }

    #[test]
    fn test_announces_chunks() {
        let mut header = Header::new();
        header.size = Some(10);
        assert!(!header.announces_chunks(0));
        header.address = Some("work".to_string());
        assert!(header.announces_chunks(0));
        assert!(!header.announces_chunks(10));
    }

    #[test]
    fn test_empty_header() {
        assert!(Header::new().is_empty());
        assert!(!Header::new().with_extra("k", json!(1)).is_empty());
    }
}
