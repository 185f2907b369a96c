//! Bit-packed binary codec used for every payload on the wire.
//!
//! Whole values are big-endian. Single bits are packed MSB-first into a
//! partial byte which is committed as soon as any whole value follows, so
//! bits and whole values never share a byte.

mod half;
mod marshaller;
mod unmarshaller;

pub use half::{f16_to_f32, f32_to_f16};
pub use marshaller::Marshaller;
pub use unmarshaller::Unmarshaller;

/// Longest LEB128 encoding of a 32-bit value.
pub const IVAR32_MAX_BYTES: usize = 5;
/// Longest LEB128 encoding of a 64-bit value.
pub const IVAR64_MAX_BYTES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer overflow: {needed} bytes needed, {remaining} remaining")]
    Overflow { needed: usize, remaining: usize },
    #[error("buffer underflow: {needed} bytes needed, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },
    #[error("malformed {bits}-bit variable-length integer")]
    MalformedVarInt { bits: u32 },
}

#[inline]
pub(crate) fn zigzag_encode32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[inline]
pub(crate) fn zigzag_decode32(value: u32) -> i32 {
    (value >> 1) as i32 ^ -((value & 1) as i32)
}

#[inline]
pub(crate) fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub(crate) fn zigzag_decode64(value: u64) -> i64 {
    (value >> 1) as i64 ^ -((value & 1) as i64)
}
