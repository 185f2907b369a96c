use crate::codec::Unmarshaller;

use super::error::ConnectionError;
use super::protocol::FRAME_HEADER_SIZE;

/// Reassembles length-prefixed frames from a byte stream.
///
/// After a bogus length the framer refuses further input; a peer that lied
/// about framing cannot be resynchronised.
#[derive(Debug)]
pub struct PacketFramer {
    buffer: Vec<u8>,
    max_packet_size: usize,
    poisoned: bool,
}

impl PacketFramer {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_packet_size,
            poisoned: false,
        }
    }

    /// Appends `chunk` and hands every complete payload to `sink` in order.
    /// Returns how many payloads were emitted.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        mut sink: impl FnMut(Vec<u8>),
    ) -> Result<usize, ConnectionError> {
        if self.poisoned {
            return Err(ConnectionError::Closed);
        }

        self.buffer.extend_from_slice(chunk);

        let mut offset = 0;
        let mut emitted = 0;
        while self.buffer.len() - offset >= FRAME_HEADER_SIZE {
            let mut reader = Unmarshaller::new(&self.buffer[offset..]);
            let len = reader.read_u32()? as usize;
            if len > self.max_packet_size {
                self.poisoned = true;
                self.buffer.clear();
                return Err(ConnectionError::PacketTooLarge {
                    len,
                    max: self.max_packet_size,
                });
            }

            let start = offset + FRAME_HEADER_SIZE;
            if self.buffer.len() - start < len {
                break;
            }

            sink(self.buffer[start..start + len].to_vec());
            offset = start + len;
            emitted += 1;
        }

        self.buffer.drain(..offset);
        Ok(emitted)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::encode_frame;

    fn stream(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for payload in payloads {
            encode_frame(payload, &mut out).unwrap();
        }
        out
    }

    fn feed_in_chunks(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
        let mut framer = PacketFramer::new(1024);
        let mut packets = Vec::new();
        for chunk in data.chunks(chunk_size) {
            framer.feed(chunk, |p| packets.push(p)).unwrap();
        }
        assert_eq!(framer.buffered(), 0);
        packets
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let payloads: [&[u8]; 4] = [b"first", b"", b"a somewhat longer third payload", b"x"];
        let data = stream(&payloads);

        let whole = feed_in_chunks(&data, data.len());
        assert_eq!(whole, payloads.iter().map(|p| p.to_vec()).collect::<Vec<_>>());

        for chunk_size in 1..data.len() {
            assert_eq!(feed_in_chunks(&data, chunk_size), whole, "chunk {}", chunk_size);
        }
    }

    #[test]
    fn test_split_mid_header_and_mid_payload() {
        let data = stream(&[&b"hello"[..], &b"world"[..]]);
        let mut framer = PacketFramer::new(1024);
        let mut packets = Vec::new();

        assert_eq!(framer.feed(&data[..2], |p| packets.push(p)).unwrap(), 0);
        assert_eq!(framer.buffered(), 2);
        assert_eq!(framer.feed(&data[2..7], |p| packets.push(p)).unwrap(), 0);
        assert_eq!(framer.feed(&data[7..12], |p| packets.push(p)).unwrap(), 1);
        assert_eq!(framer.feed(&data[12..], |p| packets.push(p)).unwrap(), 1);

        assert_eq!(packets, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn test_oversized_length_poisons() {
        let mut framer = PacketFramer::new(16);
        let mut data = Vec::new();
        encode_frame(&[0u8; 17], &mut data).unwrap();

        let result = framer.feed(&data[..4], |_| panic!("nothing should be emitted"));
        assert!(matches!(
            result,
            Err(ConnectionError::PacketTooLarge { len: 17, max: 16 })
        ));
        assert!(framer.is_poisoned());
        assert!(matches!(
            framer.feed(&stream(&[&b"ok"[..]]), |_| {}),
            Err(ConnectionError::Closed)
        ));
    }

    #[test]
    fn test_packets_before_violation_are_kept() {
        let mut framer = PacketFramer::new(8);
        let mut data = stream(&[&b"good"[..]]);
        data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);

        let mut packets = Vec::new();
        assert!(framer.feed(&data, |p| packets.push(p)).is_err());
        assert_eq!(packets, vec![b"good".to_vec()]);
    }
}
