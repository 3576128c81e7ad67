//! Distribution calculator: pro-rata shares of a settled round.
//!
//! Given a round's retained intents and its clear settlement numbers, every
//! intent is mapped to an encrypted share:
//!
//! - intents aligned with the net are scaled by `distributable / |net|`
//! - intents opposite to the net were matched internally and settle at par
//!
//! Lending supply already sits in the owner's position from submission, so
//! it needs no share. Lending withdrawals and swap sales become payouts in
//! the module's output asset, summed per owner into one [`Allocation`] each.
//! No clear individual amount is ever produced.

use std::collections::BTreeMap;

use tracing::info;
use veilround_types::{
    Allocation, CipherHandle, Direction, FheBackend, Intent, ModuleId, ModuleKind, OwnerId,
    Result, RoundId, VeilError, short_hex,
};

use crate::determinism::compute_distribution_root;
use crate::ratio::RoundPricing;

/// Everything the settlement of one round hands to the claim book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub pricing: RoundPricing,
    /// One allocation per owner, in owner order.
    pub allocations: Vec<Allocation>,
    /// Change in what the module owes its owners.
    pub position_delta: i128,
    /// Rounding the module may keep from this round's scaled payouts.
    pub dust_allowance: u128,
    pub root: [u8; 32],
}

/// Compute allocations for a settled round.
///
/// # Errors
/// - `InvariantViolation` if an intent belongs to another round, a swap
///   round holds a debit, or lending supply would be priced off par
/// - any backend error from homomorphic scaling
#[allow(clippy::too_many_arguments)]
pub fn compute_distribution<F: FheBackend>(
    fhe: &mut F,
    module: ModuleId,
    kind: &ModuleKind,
    round: RoundId,
    intents: &[Intent],
    net: i128,
    received: u128,
) -> Result<Distribution> {
    let pricing = RoundPricing::new(kind, net, received)?;
    let plan = pricing.ratio.plan();

    let mut ordered: Vec<&Intent> = intents.iter().collect();
    ordered.sort_by_key(|i| i.sequence);

    let mut payouts: BTreeMap<OwnerId, Option<CipherHandle>> = BTreeMap::new();
    let mut scaled: u128 = 0;
    for intent in ordered {
        if intent.round != round {
            return Err(VeilError::InvariantViolation {
                reason: format!("intent of {} found in {round}", intent.round),
            });
        }
        let aligned = pricing.aligned == Some(intent.direction);
        let slot = payouts.entry(intent.owner).or_default();
        match (kind, intent.direction) {
            (ModuleKind::Lending { .. }, Direction::Credit) => {
                if aligned && !plan.is_identity() {
                    return Err(VeilError::InvariantViolation {
                        reason: format!("{module} supply in {round} priced off par"),
                    });
                }
                continue;
            }
            (ModuleKind::Swap { .. }, Direction::Debit) => {
                return Err(VeilError::InvariantViolation {
                    reason: format!("{module} swap {round} holds a debit intent"),
                });
            }
            _ => {}
        }
        let share = if aligned {
            if plan.rounds() {
                scaled += 1;
            }
            plan.apply(fhe, intent.amount)?
        } else {
            intent.amount
        };
        *slot = Some(match *slot {
            Some(sum) => fhe.add(sum, share)?,
            None => share,
        });
    }

    let allocations: Vec<Allocation> = payouts
        .into_iter()
        .map(|(owner, payout)| Allocation {
            owner,
            round,
            payout,
        })
        .collect();

    let dust_allowance = match kind {
        ModuleKind::Swap { .. } => plan.dust_bound(scaled, pricing.requested),
        ModuleKind::Lending { .. } => 0,
    };
    let root = compute_distribution_root(module, round, &allocations);

    info!(
        %module,
        %round,
        net = pricing.net,
        received = pricing.received,
        distributable = pricing.distributable,
        reserve = pricing.reserve,
        ratio = ?pricing.ratio.as_decimal(),
        allocations = allocations.len(),
        root = %short_hex(&root),
        "distribution computed"
    );

    Ok(Distribution {
        position_delta: pricing.position_delta(kind),
        pricing,
        allocations,
        dust_allowance,
        root,
    })
}
