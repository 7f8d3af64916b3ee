//! Compact ("nBits") target encoding.
//!
//! A 256-bit target is stored in headers as a 32-bit float-like value:
//! bits 24..32 are an exponent counting bytes, bits 0..23 a mantissa, and
//! `value = mantissa * 256^(exponent - 3)`. Bit 23 is a sign bit inherited
//! from OpenSSL's MPI format. Negative targets have no meaning here, so a set
//! sign bit with a non-zero mantissa is a decode error. A zero mantissa
//! decodes to zero whatever the sign.

use num_bigint::BigUint;
use num_traits::Zero;
use std::fmt;

/// 256-bit unsigned proof-of-work target
pub type Target = BigUint;

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    /// Sign bit set with a non-zero mantissa
    Negative,
    /// Value does not fit in 256 bits
    Overflow,
}

impl fmt::Display for CompactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompactError::Negative => write!(f, "negative compact target"),
            CompactError::Overflow => write!(f, "compact target overflows 256 bits"),
        }
    }
}
impl std::error::Error for CompactError {}

/// Expand compact bits into a full target.
pub fn decode(compact: u32) -> Result<Target, CompactError> {
    let size = compact >> 24;
    let word = if size <= 3 {
        (compact & MANTISSA_MASK) >> (8 * (3 - size))
    } else {
        compact & MANTISSA_MASK
    };

    if word == 0 {
        return Ok(Target::zero());
    }
    if compact & SIGN_BIT != 0 {
        return Err(CompactError::Negative);
    }
    if size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32) {
        return Err(CompactError::Overflow);
    }

    if size <= 3 {
        Ok(Target::from(word))
    } else {
        Ok(Target::from(word) << (8 * (size - 3) as usize))
    }
}

/// Encode a target into canonical compact form, dropping every byte below
/// the three most significant ones.
pub fn encode(target: &Target) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = ((target.bits() + 7) / 8) as u32;
    let mut word = if size <= 3 {
        low_u32(target) << (8 * (3 - size))
    } else {
        low_u32(&(target >> (8 * (size - 3) as usize)))
    };

    // Keep the sign bit clear by moving one byte into the exponent
    if word & SIGN_BIT != 0 {
        word >>= 8;
        size += 1;
    }

    word | (size << 24)
}

/// Lowest 32 bits of `value`.
fn low_u32(value: &Target) -> u32 {
    value.iter_u32_digits().next().unwrap_or(0)
}
