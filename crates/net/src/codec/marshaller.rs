use super::half::f32_to_f16;
use super::{zigzag_encode32, zigzag_encode64, CodecError, IVAR64_MAX_BYTES};

/// Writes values into a fixed-capacity buffer.
///
/// Starting a partial bit byte reserves its slot up front, so a full
/// buffer is reported by the `write_bit` that needs a new byte and
/// [`finish`](Self::finish) itself can never fail.
pub struct Marshaller<'a> {
    buffer: &'a mut [u8],
    position: usize,
    bit_slot: usize,
    bit_count: u8,
}

impl<'a> Marshaller<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            bit_slot: 0,
            bit_count: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn reserve(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::Overflow { needed, remaining });
        }
        Ok(())
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<(), CodecError> {
        if self.bit_count == 0 {
            self.reserve(1)?;
            self.bit_slot = self.position;
            self.buffer[self.bit_slot] = 0;
            self.position += 1;
        }

        if bit {
            self.buffer[self.bit_slot] |= 0x80 >> self.bit_count;
        }
        self.bit_count = (self.bit_count + 1) % 8;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.reserve(bytes.len())?;
        self.bit_count = 0;
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    #[inline]
    fn write_uint(&mut self, value: u64, width: usize) -> Result<(), CodecError> {
        let bytes = value.to_be_bytes();
        self.write_bytes(&bytes[8 - width..])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<(), CodecError> {
        self.write_uint(value as u64, 1)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_uint(u64::from(value), 1)
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), CodecError> {
        self.write_uint(value as u64, 2)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_uint(u64::from(value), 2)
    }

    /// Writes the low 24 bits.
    pub fn write_i24(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_uint(value as u64, 3)
    }

    /// Writes the low 24 bits.
    pub fn write_u24(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_uint(u64::from(value), 3)
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_uint(value as u64, 4)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_uint(u64::from(value), 4)
    }

    pub fn write_i40(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_uint(value as u64, 5)
    }

    pub fn write_u40(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_uint(value, 5)
    }

    pub fn write_i48(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_uint(value as u64, 6)
    }

    pub fn write_u48(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_uint(value, 6)
    }

    pub fn write_i56(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_uint(value as u64, 7)
    }

    pub fn write_u56(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_uint(value, 7)
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_uint(value as u64, 8)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_uint(value, 8)
    }

    fn write_varint(&mut self, mut value: u64) -> Result<(), CodecError> {
        let mut groups = [0u8; IVAR64_MAX_BYTES];
        let mut len = 0;
        loop {
            let group = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                groups[len] = group;
                len += 1;
                break;
            }
            groups[len] = group | 0x80;
            len += 1;
        }
        self.write_bytes(&groups[..len])
    }

    /// Zigzag + LEB128, 1 to 5 bytes.
    pub fn write_ivar32(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_varint(u64::from(zigzag_encode32(value)))
    }

    /// Zigzag + LEB128, 1 to 10 bytes.
    pub fn write_ivar64(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_varint(zigzag_encode64(value))
    }

    pub fn write_f16(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_u16(f32_to_f16(value))
    }

    /// Ends the partial byte, if any, and returns everything written.
    pub fn finish(self) -> &'a [u8] {
        let Self {
            buffer, position, ..
        } = self;
        let buffer: &'a [u8] = buffer;
        &buffer[..position]
    }
}
