//! Claim book: exactly-once claims of round allocations.
//!
//! Allocations never expire: an unclaimed allocation stays claimable for
//! as long as the engine state exists. Claimed allocations are kept too, so
//! conservation audits can account for every payout a round produced.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use veilround_types::{Allocation, CipherHandle, OwnerId, Result, RoundId, VeilError};

/// Allocations per settled round and the record of completed claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimBook {
    allocations: BTreeMap<RoundId, BTreeMap<OwnerId, Allocation>>,
    claimed: BTreeMap<RoundId, BTreeSet<OwnerId>>,
}

impl ClaimBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the allocations of a freshly settled round.
    ///
    /// # Errors
    /// `InvariantViolation` if the round was already distributed.
    pub fn record(&mut self, round: RoundId, allocations: Vec<Allocation>) -> Result<()> {
        if self.allocations.contains_key(&round) {
            return Err(VeilError::InvariantViolation {
                reason: format!("{round} distributed twice"),
            });
        }
        let by_owner = allocations.into_iter().map(|a| (a.owner, a)).collect();
        self.allocations.insert(round, by_owner);
        Ok(())
    }

    /// Whether allocations were recorded for the round.
    #[must_use]
    pub fn is_distributed(&self, round: RoundId) -> bool {
        self.allocations.contains_key(&round)
    }

    /// The allocation an owner could claim now.
    ///
    /// # Errors
    /// - `ClaimedTwice` if the owner already claimed this round
    /// - `NoPositionInRound` if the owner has no allocation in the round
    pub fn pending(&self, round: RoundId, owner: OwnerId) -> Result<&Allocation> {
        if self.is_claimed(round, owner) {
            return Err(VeilError::ClaimedTwice { round, owner });
        }
        self.allocations
            .get(&round)
            .and_then(|m| m.get(&owner))
            .ok_or(VeilError::NoPositionInRound { round, owner })
    }

    /// Mark a claim complete and hand back the allocation.
    ///
    /// # Errors
    /// Same as [`ClaimBook::pending`].
    pub fn complete(&mut self, round: RoundId, owner: OwnerId) -> Result<Allocation> {
        let allocation = self.pending(round, owner)?.clone();
        self.claimed.entry(round).or_default().insert(owner);
        Ok(allocation)
    }

    #[must_use]
    pub fn is_claimed(&self, round: RoundId, owner: OwnerId) -> bool {
        self.claimed.get(&round).is_some_and(|s| s.contains(&owner))
    }

    /// Every payout allocated so far, claimed or not.
    pub fn payouts(&self) -> impl Iterator<Item = CipherHandle> + '_ {
        self.allocations
            .values()
            .flat_map(BTreeMap::values)
            .filter_map(|a| a.payout)
    }

    /// Number of allocations still waiting to be claimed.
    #[must_use]
    pub fn unclaimed_count(&self) -> usize {
        let total: usize = self.allocations.values().map(BTreeMap::len).sum();
        let claimed: usize = self.claimed.values().map(BTreeSet::len).sum();
        total - claimed
    }
}
