use std::fmt;

use crate::codec::{CodecError, Marshaller, Unmarshaller};

pub const PROTOCOL_VERSION: u16 = 1;
pub const PORT_CHECK_MAGIC: u32 = 0x5043_484B;
pub const DEFAULT_PORT: u16 = 27015;

pub const FRAME_HEADER_SIZE: usize = 4;
pub const DATAGRAM_HEADER_SIZE: usize = 8;
pub const HANDSHAKE_SIZE: usize = 2 + 8;

pub const MAX_PACKET_SIZE: usize = 1024 * 1024;
pub const MAX_DATAGRAM_SIZE: usize = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
    /// Draws a random id whose high half can never be mistaken for the
    /// port-check magic.
    pub fn generate(is_taken: impl Fn(CorrelationId) -> bool) -> Self {
        loop {
            let id = CorrelationId(rand::random::<u64>());
            if (id.0 >> 32) as u32 != PORT_CHECK_MAGIC && !is_taken(id) {
                return id;
            }
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn reliable(payload: Vec<u8>) -> Self {
        Self {
            channel: Channel::Reliable,
            payload,
        }
    }

    pub fn unreliable(payload: Vec<u8>) -> Self {
        Self {
            channel: Channel::Unreliable,
            payload,
        }
    }

    pub fn reader(&self) -> Unmarshaller<'_> {
        Unmarshaller::new(&self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Datagram<'a> {
    PortCheck,
    Tagged {
        id: CorrelationId,
        payload: &'a [u8],
    },
    Malformed,
}

pub fn parse_datagram(data: &[u8]) -> Datagram<'_> {
    let mut reader = Unmarshaller::new(data);
    if let Ok(magic) = reader.read_u32() {
        if magic == PORT_CHECK_MAGIC {
            return Datagram::PortCheck;
        }
    }

    let mut reader = Unmarshaller::new(data);
    match reader.read_u64() {
        Ok(id) => Datagram::Tagged {
            id: CorrelationId(id),
            payload: reader.remaining_bytes(),
        },
        Err(_) => Datagram::Malformed,
    }
}

/// Appends `[u32 length][payload]` to `out`.
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut marshaller = Marshaller::new(&mut header);
    let len = u32::try_from(payload.len()).map_err(|_| CodecError::Overflow {
        needed: payload.len(),
        remaining: u32::MAX as usize,
    })?;
    marshaller.write_u32(len)?;
    out.extend_from_slice(marshaller.finish());
    out.extend_from_slice(payload);
    Ok(())
}

pub fn encode_datagram(id: CorrelationId, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut buffer = vec![0u8; DATAGRAM_HEADER_SIZE + payload.len()];
    let mut marshaller = Marshaller::new(&mut buffer);
    marshaller.write_u64(id.0)?;
    marshaller.write_bytes(payload)?;
    Ok(buffer)
}

pub fn encode_port_check() -> [u8; 4] {
    PORT_CHECK_MAGIC.to_be_bytes()
}

pub fn encode_handshake(id: CorrelationId) -> Result<Vec<u8>, CodecError> {
    let mut buffer = vec![0u8; HANDSHAKE_SIZE];
    let mut marshaller = Marshaller::new(&mut buffer);
    marshaller.write_u16(PROTOCOL_VERSION)?;
    marshaller.write_u64(id.0)?;
    Ok(buffer)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("unsupported protocol version {0}")]
    Version(u16),
    #[error("truncated handshake: {0}")]
    Codec(#[from] CodecError),
    #[error("handshake has {0} trailing bytes")]
    TrailingBytes(usize),
}

pub fn decode_handshake(payload: &[u8]) -> Result<CorrelationId, HandshakeError> {
    let mut reader = Unmarshaller::new(payload);
    let version = reader.read_u16()?;
    if version != PROTOCOL_VERSION {
        return Err(HandshakeError::Version(version));
    }
    let id = CorrelationId(reader.read_u64()?);
    if reader.remaining() > 0 {
        return Err(HandshakeError::TrailingBytes(reader.remaining()));
    }
    Ok(id)
}
