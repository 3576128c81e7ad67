//! Offset-bias encoding of signed contributions.
//!
//! The homomorphic plaintext space is unsigned 128-bit. A signed amount
//! `±a` (with `a ≤ u64::MAX`) is encoded as `BIAS ± a` where `BIAS = 2^64`,
//! so every encoded term lies in `[1, 2^65)`. A sum of `n` terms with
//! `n ≤ 2^32` stays below `2^97`, far from wrapping. Because `n` is public
//! (it is the round's intent count), decoding is `Σ − n·BIAS`.

use crate::constants::{ENCODING_BIAS, MAX_ENCODED_TERMS, MAX_INTENT_AMOUNT};
use crate::{Direction, Result, VeilError};

/// Stateless codec for biased signed values.
pub struct SignedEncoding;

impl SignedEncoding {
    /// Encode one signed amount.
    ///
    /// # Errors
    /// `AmountOutOfRange` if `amount > u64::MAX`.
    pub fn encode(direction: Direction, amount: u128) -> Result<u128> {
        if amount > MAX_INTENT_AMOUNT {
            return Err(VeilError::AmountOutOfRange { amount });
        }
        Ok(match direction {
            Direction::Credit => ENCODING_BIAS + amount,
            Direction::Debit => ENCODING_BIAS - amount,
        })
    }

    /// Total bias carried by a sum of `terms` encoded values.
    ///
    /// # Errors
    /// `EncodingOverflow` if `terms` exceeds the supported term count.
    pub fn bias_for(terms: u64) -> Result<u128> {
        if terms > MAX_ENCODED_TERMS {
            return Err(VeilError::EncodingOverflow {
                reason: format!("{terms} terms exceed limit {MAX_ENCODED_TERMS}"),
            });
        }
        Ok(u128::from(terms) * ENCODING_BIAS)
    }

    /// Decode a clear sum of `terms` encoded values back to a signed net.
    ///
    /// # Errors
    /// `EncodingOverflow` if the sum could not have been produced by `terms`
    /// valid encodings. That only happens on an encoding or sequencing bug.
    pub fn decode(sum: u128, terms: u64) -> Result<i128> {
        let bias = Self::bias_for(terms)?;
        let limit = u128::from(terms) * MAX_INTENT_AMOUNT;
        let (lo, hi) = (bias - limit, bias + limit);
        if sum < lo || sum > hi {
            return Err(VeilError::EncodingOverflow {
                reason: format!("sum outside the range of {terms} encoded terms"),
            });
        }
        // Both operands are below 2^97, so the casts are lossless.
        #[allow(clippy::cast_possible_wrap)]
        let net = sum as i128 - bias as i128;
        Ok(net)
    }

    /// Encode a signed test value (used by property tests).
    ///
    /// # Errors
    /// Same as [`SignedEncoding::encode`].
    pub fn encode_signed(value: i128) -> Result<u128> {
        let direction = if value < 0 {
            Direction::Debit
        } else {
            Direction::Credit
        };
        Self::encode(direction, value.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_encodes_to_bias() {
        assert_eq!(SignedEncoding::encode(Direction::Credit, 0).unwrap(), ENCODING_BIAS);
        assert_eq!(SignedEncoding::encode(Direction::Debit, 0).unwrap(), ENCODING_BIAS);
    }

    #[test]
    fn single_term_roundtrip_extremes() {
        for (dir, amount, expected) in [
            (Direction::Credit, 0u128, 0i128),
            (Direction::Credit, MAX_INTENT_AMOUNT, i128::from(u64::MAX)),
            (Direction::Debit, MAX_INTENT_AMOUNT, -i128::from(u64::MAX)),
        ] {
            let enc = SignedEncoding::encode(dir, amount).unwrap();
            assert_eq!(SignedEncoding::decode(enc, 1).unwrap(), expected);
        }
    }

    #[test]
    fn mixed_sum_decodes_to_net() {
        let a = SignedEncoding::encode(Direction::Credit, 100).unwrap();
        let b = SignedEncoding::encode(Direction::Debit, 40).unwrap();
        assert_eq!(SignedEncoding::decode(a + b, 2).unwrap(), 60);

        let c = SignedEncoding::encode(Direction::Debit, 70).unwrap();
        assert_eq!(SignedEncoding::decode(a + b + c, 3).unwrap(), -10);
    }

    #[test]
    fn amount_above_u64_rejected() {
        let err = SignedEncoding::encode(Direction::Credit, MAX_INTENT_AMOUNT + 1).unwrap_err();
        assert!(matches!(err, VeilError::AmountOutOfRange { .. }));
    }

    #[test]
    fn empty_sum_decodes_to_zero() {
        assert_eq!(SignedEncoding::decode(0, 0).unwrap(), 0);
    }

    #[test]
    fn impossible_sum_is_consistency_error() {
        // One term can never decode to more than u64::MAX.
        let err = SignedEncoding::decode(ENCODING_BIAS * 3, 1).unwrap_err();
        assert!(err.is_fatal());
        let err = SignedEncoding::decode(7, 0).unwrap_err();
        assert!(matches!(err, VeilError::EncodingOverflow { .. }));
    }

    #[test]
    fn too_many_terms_rejected() {
        assert!(SignedEncoding::bias_for(MAX_ENCODED_TERMS).is_ok());
        assert!(SignedEncoding::bias_for(MAX_ENCODED_TERMS + 1).is_err());
    }

    #[test]
    fn encode_signed_matches_direction() {
        assert_eq!(
            SignedEncoding::encode_signed(-5).unwrap(),
            SignedEncoding::encode(Direction::Debit, 5).unwrap()
        );
        assert_eq!(
            SignedEncoding::encode_signed(5).unwrap(),
            SignedEncoding::encode(Direction::Credit, 5).unwrap()
        );
    }
}
