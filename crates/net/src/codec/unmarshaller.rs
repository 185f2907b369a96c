use super::half::f16_to_f32;
use super::{zigzag_decode32, zigzag_decode64, CodecError, IVAR32_MAX_BYTES, IVAR64_MAX_BYTES};

/// Reads values written by [`Marshaller`](super::Marshaller).
///
/// A failed read leaves the position untouched.
pub struct Unmarshaller<'a> {
    buffer: &'a [u8],
    position: usize,
    bit_byte: u8,
    bit_count: u8,
}

impl<'a> Unmarshaller<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            bit_byte: 0,
            bit_count: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    fn require(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::Underflow { needed, remaining });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool, CodecError> {
        if self.bit_count == 0 {
            self.require(1)?;
            self.bit_byte = self.buffer[self.position];
            self.position += 1;
        }

        let bit = self.bit_byte & (0x80 >> self.bit_count) != 0;
        self.bit_count = (self.bit_count + 1) % 8;
        Ok(bit)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.require(len)?;
        self.bit_count = 0;
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Everything after the current position.
    pub fn remaining_bytes(&mut self) -> &'a [u8] {
        self.bit_count = 0;
        let bytes = &self.buffer[self.position..];
        self.position = self.buffer.len();
        bytes
    }

    #[inline]
    fn read_uint(&mut self, width: usize) -> Result<u64, CodecError> {
        let bytes = self.read_bytes(width)?;
        Ok(bytes
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
    }

    #[inline]
    fn read_sint(&mut self, width: usize) -> Result<i64, CodecError> {
        let shift = 64 - 8 * width as u32;
        let raw = self.read_uint(width)?;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_sint(1)? as i8)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_uint(1)? as u8)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.read_sint(2)? as i16)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_i24(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_sint(3)? as i32)
    }

    pub fn read_u24(&mut self) -> Result<u32, CodecError> {
        Ok(self.read_uint(3)? as u32)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_sint(4)? as i32)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.read_uint(4)? as u32)
    }

    pub fn read_i40(&mut self) -> Result<i64, CodecError> {
        self.read_sint(5)
    }

    pub fn read_u40(&mut self) -> Result<u64, CodecError> {
        self.read_uint(5)
    }

    pub fn read_i48(&mut self) -> Result<i64, CodecError> {
        self.read_sint(6)
    }

    pub fn read_u48(&mut self) -> Result<u64, CodecError> {
        self.read_uint(6)
    }

    pub fn read_i56(&mut self) -> Result<i64, CodecError> {
        self.read_sint(7)
    }

    pub fn read_u56(&mut self) -> Result<u64, CodecError> {
        self.read_uint(7)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.read_sint(8)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.read_uint(8)
    }

    /// Decodes one LEB128 value of at most `bits` payload bits.
    ///
    /// Scans before consuming so a truncated value can be retried once more
    /// input is available.
    fn read_varint(&mut self, max_groups: usize, bits: u32) -> Result<u64, CodecError> {
        let mut value = 0u64;
        for group in 0..max_groups {
            let Some(&byte) = self.buffer.get(self.position + group) else {
                return Err(CodecError::Underflow {
                    needed: group + 1,
                    remaining: self.remaining(),
                });
            };

            let shift = 7 * group as u32;
            let payload = u64::from(byte & 0x7F);
            if group == max_groups - 1 {
                let spare = bits - shift;
                if byte & 0x80 != 0 || payload >> spare != 0 {
                    return Err(CodecError::MalformedVarInt { bits });
                }
            }

            value |= payload << shift;
            if byte & 0x80 == 0 {
                self.position += group + 1;
                self.bit_count = 0;
                return Ok(value);
            }
        }
        Err(CodecError::MalformedVarInt { bits })
    }

    pub fn read_ivar32(&mut self) -> Result<i32, CodecError> {
        let raw = self.read_varint(IVAR32_MAX_BYTES, 32)?;
        Ok(zigzag_decode32(raw as u32))
    }

    pub fn read_ivar64(&mut self) -> Result<i64, CodecError> {
        let raw = self.read_varint(IVAR64_MAX_BYTES, 64)?;
        Ok(zigzag_decode64(raw))
    }

    pub fn read_f16(&mut self) -> Result<f32, CodecError> {
        Ok(f16_to_f32(self.read_u16()?))
    }
}
