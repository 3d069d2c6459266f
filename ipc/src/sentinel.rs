//! Reserved values shared by both ends of every channel

/// Body that marks the end of a stream
pub const EOF_MSG: &[u8] = b"EOF!!!";

/// Body a client request driver sends once when it starts
pub const CLIENT_SIGNON: &[u8] = b"YGG_BEGIN_CLIENT";

/// `response_address` value meaning "no reply expected"
pub const RESPONSE_EOF: &str = "EOF";

/// Marker enclosing a serialized header
pub const MSG_HEAD: &[u8] = b"YGG_MSG_HEAD";

/// Largest frame a size-limited transport carries in one piece
pub const DEFAULT_MAX_MSG_SIZE: usize = 2048;
