//! Share ratios and round pricing.
//!
//! A settled round hands `distributable` units back to the intents aligned
//! with its net, in proportion to `|net|`. The ratio is kept as an exact
//! reduced fraction; only the homomorphic application may have to
//! approximate it (rounding down, never up).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veilround_types::{
    CipherHandle, Direction, FheBackend, ModuleKind, Result, VeilError,
    constants::MAX_INTENT_AMOUNT,
};

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Exact, reduced `numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRatio {
    numerator: u128,
    denominator: u128,
}

impl ShareRatio {
    /// # Errors
    /// `InvariantViolation` on a zero denominator.
    pub fn new(numerator: u128, denominator: u128) -> Result<Self> {
        if denominator == 0 {
            return Err(VeilError::InvariantViolation {
                reason: "share ratio with zero denominator".into(),
            });
        }
        let g = gcd(numerator, denominator).max(1);
        Ok(Self {
            numerator: numerator / g,
            denominator: denominator / g,
        })
    }

    /// 1:1.
    #[must_use]
    pub fn par() -> Self {
        Self {
            numerator: 1,
            denominator: 1,
        }
    }

    #[must_use]
    pub fn is_par(&self) -> bool {
        self.numerator == self.denominator
    }

    #[must_use]
    pub fn numerator(&self) -> u128 {
        self.numerator
    }

    #[must_use]
    pub fn denominator(&self) -> u128 {
        self.denominator
    }

    /// Decimal form for reports. `None` if it does not fit.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        let num = Decimal::try_from_i128_with_scale(i128::try_from(self.numerator).ok()?, 0).ok()?;
        let den =
            Decimal::try_from_i128_with_scale(i128::try_from(self.denominator).ok()?, 0).ok()?;
        num.checked_div(den)
    }

    /// Split into `quotient + frac_num / frac_den` with 64-bit fraction terms.
    ///
    /// Multiplying a 64-bit intent by `frac_num` must stay below 2^128, so a
    /// remainder wider than 64 bits is shifted down (and the denominator
    /// rounded up), which can only lower the ratio.
    #[must_use]
    pub fn plan(&self) -> ScalePlan {
        let quotient = self.numerator / self.denominator;
        let rem = self.numerator % self.denominator;
        if rem == 0 {
            return ScalePlan {
                quotient,
                frac_num: 0,
                frac_den: 1,
                approximated: false,
            };
        }
        if rem <= MAX_INTENT_AMOUNT {
            return ScalePlan {
                quotient,
                frac_num: rem,
                frac_den: self.denominator,
                approximated: false,
            };
        }
        let shift = 64 - rem.leading_zeros();
        ScalePlan {
            quotient,
            frac_num: rem >> shift,
            frac_den: (self.denominator >> shift) + 1,
            approximated: true,
        }
    }
}

/// How a ratio is applied to one encrypted amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePlan {
    pub quotient: u128,
    pub frac_num: u128,
    pub frac_den: u128,
    pub approximated: bool,
}

impl ScalePlan {
    /// Whether scaling reproduces the input unchanged.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.quotient == 1 && self.frac_num == 0
    }

    /// Whether scaling floors (loses up to one unit per intent).
    #[must_use]
    pub fn rounds(&self) -> bool {
        self.frac_num != 0
    }

    /// `x·q + ⌊x·fn / fd⌋` in clear (mirrors [`ScalePlan::apply`]).
    #[must_use]
    pub fn scale_clear(&self, x: u128) -> u128 {
        x.wrapping_mul(self.quotient)
            .wrapping_add(x.wrapping_mul(self.frac_num) / self.frac_den)
    }

    /// Homomorphically scale `x`.
    pub fn apply<F: FheBackend>(&self, fhe: &mut F, x: CipherHandle) -> Result<CipherHandle> {
        if self.is_identity() {
            return Ok(x);
        }
        let whole = match self.quotient {
            0 => None,
            1 => Some(x),
            q => Some(fhe.mul_scalar(x, q)?),
        };
        let frac = if self.frac_num == 0 {
            None
        } else {
            let widened = fhe.mul_scalar(x, self.frac_num)?;
            Some(fhe.div_scalar(widened, self.frac_den)?)
        };
        match (whole, frac) {
            (Some(w), Some(f)) => fhe.add(w, f),
            (Some(h), None) | (None, Some(h)) => Ok(h),
            (None, None) => fhe.trivial(0),
        }
    }

    /// Upper bound on units lost when `count` intents summing to `total`
    /// are scaled with this plan.
    #[must_use]
    pub fn dust_bound(&self, count: u128, total: u128) -> u128 {
        if !self.rounds() {
            return 0;
        }
        let approx = if self.approximated {
            (total >> 62) + 1
        } else {
            0
        };
        count.saturating_add(approx)
    }
}

/// Clear numbers of a settled round, as derived from the venue receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPricing {
    pub net: i128,
    /// `|net|`.
    pub requested: u128,
    pub received: u128,
    pub distributable: u128,
    pub reserve: u128,
    /// Sign of the net; `None` when the round netted to zero.
    pub aligned: Option<Direction>,
    /// Applied to aligned intents. Opposite intents settle at par.
    pub ratio: ShareRatio,
}

impl RoundPricing {
    /// Price a round of `kind` that netted to `net` and received `received`.
    ///
    /// Lending distributes at most `|net|` (par) and keeps any surplus as
    /// reserve; a swap distributes everything it received.
    ///
    /// # Errors
    /// `InvariantViolation` if a swap round nets negative.
    pub fn new(kind: &ModuleKind, net: i128, received: u128) -> Result<Self> {
        let requested = net.unsigned_abs();
        let Some(aligned) = Direction::of_net(net) else {
            return Ok(Self {
                net,
                requested,
                received,
                distributable: 0,
                reserve: received,
                aligned: None,
                ratio: ShareRatio::par(),
            });
        };
        let distributable = match kind {
            ModuleKind::Lending { .. } => received.min(requested),
            ModuleKind::Swap { .. } => {
                if aligned == Direction::Debit {
                    return Err(VeilError::InvariantViolation {
                        reason: "swap round netted negative".into(),
                    });
                }
                received
            }
        };
        Ok(Self {
            net,
            requested,
            received,
            distributable,
            reserve: received - distributable,
            aligned: Some(aligned),
            ratio: ShareRatio::new(distributable, requested)?,
        })
    }

    /// Units this round adds to the module's positions in aggregate.
    ///
    /// Lending positions move by the net (shares at par); swap positions
    /// receive the distributable output.
    #[must_use]
    pub fn position_delta(&self, kind: &ModuleKind) -> i128 {
        match kind {
            ModuleKind::Lending { .. } => self.net,
            ModuleKind::Swap { .. } => i128::try_from(self.distributable).unwrap_or(i128::MAX),
        }
    }
}
