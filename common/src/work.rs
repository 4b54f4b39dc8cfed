//! Proof-of-work arithmetic over compact difficulty encodings.

use ruint::aliases::U256;

/// Cumulative proof-of-work. 256 bits: the sum over a chain of
/// per-header proofs cannot overflow in practice.
pub type Work = U256;

/// Expand a compact "bits" encoding into a 256-bit target.
///
/// Returns `None` for negative, zero or overflowing encodings, which
/// carry no work.
pub fn expand_compact(bits: u32) -> Option<U256> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;

    // Sign bit set means a negative target.
    if bits & 0x0080_0000 != 0 || mantissa == 0 {
        return None;
    }

    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        let shift = 8 * (exponent - 3);
        // 23 mantissa bits shifted past the top word overflow.
        if shift > 256 - 24 {
            return None;
        }
        U256::from(mantissa) << shift
    };

    if target.is_zero() {
        None
    } else {
        Some(target)
    }
}

/// The numeric work a header with these bits contributes:
/// `2^256 / (target + 1)`, computed without the 257-bit numerator as
/// `(!target / (target + 1)) + 1`.
pub fn proof(bits: u32) -> Work {
    match expand_compact(bits) {
        Some(target) => (!target / (target + U256::from(1u8))) + U256::from(1u8),
        None => U256::ZERO,
    }
}

/// Interpret a hash as a big-endian 256-bit number for target comparison.
pub fn to_number(hash: &crate::Hash) -> U256 {
    U256::from_be_bytes::<32>(*hash.as_inner())
}

/// Parse a minimum-work configuration value from hex.
pub fn parse_work(s: &str) -> Result<Work, ruint::ParseError> {
    let trimmed = s.trim_start_matches("0x");
    U256::from_str_radix(trimmed, 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_standard_compact() {
        // 0x1d00ffff is the original Bitcoin limit: 0xffff << 208.
        let target = expand_compact(0x1d00ffff).unwrap();
        assert_eq!(target, U256::from(0xffffu32) << 208);
    }

    #[test]
    fn rejects_degenerate_compacts() {
        assert_eq!(expand_compact(0), None);
        assert_eq!(expand_compact(0x00800000), None); // sign bit
        assert_eq!(expand_compact(0x01000000), None); // zero mantissa
        assert_eq!(expand_compact(0xff123456), None); // overflow
    }

    #[test]
    fn harder_target_means_more_proof() {
        let easy = proof(0x1d00ffff);
        let hard = proof(0x1b00ffff);
        assert!(hard > easy);
        assert!(easy > U256::ZERO);
    }

    #[test]
    fn invalid_bits_carry_no_proof() {
        assert_eq!(proof(0), U256::ZERO);
    }

    #[test]
    fn parses_work_hex() {
        assert_eq!(parse_work("0").unwrap(), U256::ZERO);
        assert_eq!(parse_work("0x10").unwrap(), U256::from(16u8));
    }
}
