/// Target / difficulty arithmetic
///
/// Target comparisons are exact (BigUint); f64 only appears in the
/// human-facing difficulty numbers, where the 0.99 share-acceptance threshold
/// absorbs the precision loss.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

/// Decode a compact-bits value into the full target. Pure and idempotent.
///
/// A set sign bit (0x00800000) encodes a negative number, which can never be
/// a valid target; callers get zero back and treat the template as invalid.
pub fn compact_to_target(bits: u32) -> BigUint {
    let mantissa = bits & 0x007f_ffff;
    let is_negative = bits & 0x0080_0000 != 0;
    let exponent = bits >> 24;

    if is_negative {
        return BigUint::zero();
    }

    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    }
}

/// Encode a target back into compact-bits form.
pub fn target_to_compact(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let bytes = target.to_bytes_be();
    let mut exponent = bytes.len() as u32;

    let mut mantissa: u32 = if exponent <= 3 {
        let mut m = 0u32;
        for b in &bytes {
            m = (m << 8) | *b as u32;
        }
        m << (8 * (3 - exponent))
    } else {
        let shifted = target >> (8 * (exponent - 3));
        shifted.to_u32().unwrap_or(0)
    };

    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    (exponent << 24) | mantissa
}

/// Network/share difficulty for a hash value or target, relative to the
/// family's diff1 target.
pub fn target_to_difficulty(diff1: &BigUint, target: &BigUint) -> f64 {
    if target.is_zero() {
        return 0.0;
    }
    let num = diff1.to_f64().unwrap_or(f64::MAX);
    let den = target.to_f64().unwrap_or(f64::MAX);
    num / den
}

/// Target a hash must stay below to satisfy `difficulty`, used for
/// mining.set_target notifications.
pub fn difficulty_to_target(diff1: &BigUint, difficulty: f64) -> BigUint {
    const SCALE: u64 = 1 << 24;
    let scaled = (difficulty * SCALE as f64).max(1.0) as u128;
    (diff1 * SCALE) / BigUint::from(scaled)
}

/// Numeric value of a consensus digest. Digests are interpreted
/// little-endian, matching the uint256 convention of the upstream chains.
pub fn digest_value(digest: &[u8; 32]) -> BigUint {
    BigUint::from_bytes_le(digest)
}

/// 64-char big-endian hex rendering of a target, left-padded with zeros.
pub fn target_to_hex(target: &BigUint) -> String {
    format!("{:0>64}", target.to_str_radix(16))
}
