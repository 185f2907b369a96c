//! IEEE-754 binary16 conversion.
//!
//! Exact for zero, every integer in `-2048..=2048` and every power of two up
//! to 2^15. Above 2048 the spacing between representable integers doubles
//! with each power of two, so 2049 comes back as 2048 and 4097 as 4096.
//! Finite values above 65504 in magnitude become infinity.

const F16_EXP_MASK: u16 = 0x7C00;
const F16_QUIET_NAN: u16 = 0x0200;
const F32_EXP_BIAS: i32 = 127;
const F16_EXP_BIAS: i32 = 15;

/// Converts with round-to-nearest-even.
pub fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        let nan = if mantissa != 0 { F16_QUIET_NAN } else { 0 };
        return sign | F16_EXP_MASK | nan;
    }

    let half_exponent = exponent - F32_EXP_BIAS + F16_EXP_BIAS;
    if half_exponent >= 0x1F {
        return sign | F16_EXP_MASK;
    }

    if half_exponent <= 0 {
        if half_exponent < -10 {
            return sign;
        }
        let full = mantissa | 0x0080_0000;
        let shift = (14 - half_exponent) as u32;
        let mut half_mantissa = full >> shift;
        let rest = full & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        if rest > halfway || (rest == halfway && half_mantissa & 1 == 1) {
            half_mantissa += 1;
        }
        return sign | half_mantissa as u16;
    }

    let mut half = ((half_exponent as u32) << 10) | (mantissa >> 13);
    let rest = mantissa & 0x1FFF;
    if rest > 0x1000 || (rest == 0x1000 && half & 1 == 1) {
        // a carry out of the mantissa bumps the exponent, up to infinity
        half += 1;
    }
    sign | half as u16
}

pub fn f16_to_f32(half: u16) -> f32 {
    let negative = half & 0x8000 != 0;
    let sign = u32::from(half & 0x8000) << 16;
    let exponent = u32::from((half >> 10) & 0x1F);
    let mantissa = u32::from(half & 0x03FF);

    match exponent {
        0 => {
            let magnitude = mantissa as f32 * 2f32.powi(-24);
            if negative { -magnitude } else { magnitude }
        }
        0x1F => f32::from_bits(sign | 0x7F80_0000 | (mantissa << 13)),
        _ => {
            let rebased = exponent + (F32_EXP_BIAS - F16_EXP_BIAS) as u32;
            f32::from_bits(sign | (rebased << 23) | (mantissa << 13))
        }
    }
}
