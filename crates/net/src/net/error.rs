use std::io;

use crate::codec::CodecError;

use super::protocol::HandshakeError;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("declared packet length {len} exceeds maximum {max}")]
    PacketTooLarge { len: usize, max: usize },
    #[error("datagram of {len} bytes exceeds maximum {max}")]
    DatagramTooLarge { len: usize, max: usize },
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("connection not established")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("timed out")]
    Timeout,
}

impl ConnectionError {
    /// Errors caused by the peer breaking the wire protocol rather than by
    /// the transport.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ConnectionError::PacketTooLarge { .. }
                | ConnectionError::Handshake(_)
                | ConnectionError::Codec(_)
        )
    }
}
