/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Error types for broker and agent operations.

use std::fmt;

/// Error types for framing, handshake, dispatch, and dialogue operations.
///
/// I/O and decoding errors are local to one session and never take the
/// broker down; application-level errors (`UnknownPeer`, `UnknownDialogue`)
/// are surfaced to the originating agent through its error callbacks.
#[derive(Debug, Clone)]
pub enum OefError {
    /// Socket or framing failure. Terminates the affected session.
    Io(String),

    /// Malformed frame or envelope. The frame is dropped; the session survives.
    Protocol(String),

    /// Serialization or deserialization failure.
    Serialization(String),

    /// The peer closed the connection.
    ConnectionClosed,

    /// A handshake step failed or the challenge answer was wrong.
    HandshakeFailed,

    /// An operation did not complete within its configured deadline.
    Timeout,

    /// Message destination is not a connected session.
    UnknownPeer(String),

    /// No dialogue registered under this id.
    UnknownDialogue(u32),

    /// A session with this public key is already connected.
    DuplicateSession(String),
}

impl fmt::Display for OefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::HandshakeFailed => write!(f, "Handshake failed"),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::UnknownPeer(key) => write!(f, "Unknown peer: {key}"),
            Self::UnknownDialogue(id) => write!(f, "Unknown dialogue: {id}"),
            Self::DuplicateSession(key) => write!(f, "Duplicate session: {key}"),
        }
    }
}

impl std::error::Error for OefError {}

impl From<std::io::Error> for OefError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OefError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            OefError::UnknownPeer("Ghost".to_string()).to_string(),
            "Unknown peer: Ghost"
        );
        assert_eq!(
            OefError::UnknownDialogue(9).to_string(),
            "Unknown dialogue: 9"
        );
        assert_eq!(OefError::ConnectionClosed.to_string(), "Connection closed");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = OefError::from(io);
        assert!(matches!(err, OefError::Io(_)));
    }

    #[test]
    fn test_from_serde_error() {
        let bad = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = OefError::from(bad);
        assert!(matches!(err, OefError::Serialization(_)));
    }
}
