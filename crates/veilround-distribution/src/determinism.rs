//! Distribution root: a commitment to a round's allocations.
//!
//! Allocations are produced in owner order, so replaying the same settled
//! round (same intents, same clear numbers) yields the same root.

use sha2::{Digest, Sha256};
use veilround_types::{Allocation, ModuleId, RoundId};

/// Compute the distribution root over allocations (in the given order).
#[must_use]
pub fn compute_distribution_root(
    module: ModuleId,
    round: RoundId,
    allocations: &[Allocation],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"veilround:distribution_root:v1:");
    hasher.update(module.0.to_le_bytes());
    hasher.update(round.0.to_le_bytes());
    hasher.update((allocations.len() as u64).to_le_bytes());

    for alloc in allocations {
        hasher.update(alloc.owner.0.as_bytes());
        hasher.update(alloc.round.0.to_le_bytes());
        match &alloc.payout {
            Some(h) => {
                hasher.update([1u8]);
                hasher.update(h.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }

    let result = hasher.finalize();
    let mut root = [0u8; 32];
    root.copy_from_slice(&result);
    root
}

/// Recompute and compare.
#[must_use]
pub fn verify_distribution_root(
    module: ModuleId,
    round: RoundId,
    allocations: &[Allocation],
    expected_root: &[u8; 32],
) -> bool {
    compute_distribution_root(module, round, allocations) == *expected_root
}
