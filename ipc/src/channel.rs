//! Channel direction

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way messages flow through one end of a channel
///
/// Unlike a bidirectional socket, every comm is either a sender or a
/// receiver, and the two ends of a channel always have opposite directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sending end of the channel
    Send,
    /// Receiving end of the channel
    Recv,
}

impl Direction {
    /// Returns the direction of the peer end
    pub fn opposite(self) -> Self {
        match self {
            Direction::Send => Direction::Recv,
            Direction::Recv => Direction::Send,
        }
    }

    /// Checks if this is the sending end
    pub fn is_send(self) -> bool {
        matches!(self, Direction::Send)
    }

    /// Checks if this is the receiving end
    pub fn is_recv(self) -> bool {
        matches!(self, Direction::Recv)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Recv => write!(f, "recv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Send.opposite(), Direction::Recv);
        assert_eq!(Direction::Recv.opposite(), Direction::Send);
        assert!(Direction::Send.is_send());
        assert!(Direction::Recv.is_recv());
    }

    #[test]
    fn test_direction_serde() {
        let json = serde_json::to_string(&Direction::Recv).unwrap();
        assert_eq!(json, "\"recv\"");
        let back: Direction = serde_json::from_str("\"send\"").unwrap();
        assert_eq!(back, Direction::Send);
    }
}
