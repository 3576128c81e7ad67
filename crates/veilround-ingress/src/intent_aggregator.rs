//! Intent aggregator: folds encrypted intents into the round aggregate.
//!
//! Every intent contributes `BIAS ± amount` (see
//! [`SignedEncoding`](veilround_types::SignedEncoding)) to the running
//! aggregate of the Collecting round. The intent itself is retained per
//! round, in arrival order, for the distribution step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use veilround_types::{
    CipherHandle, Direction, FheBackend, Intent, OwnerId, Result, Round, RoundId, VeilError,
    constants::ENCODING_BIAS,
};

/// An owner's encrypted totals within one round, per direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerContribution {
    pub credit: Option<CipherHandle>,
    pub debit: Option<CipherHandle>,
}

/// Retains intents per round and folds them into round aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentAggregator {
    /// Intents in arrival order, per round.
    intents: BTreeMap<RoundId, Vec<Intent>>,
    contributions: BTreeMap<RoundId, BTreeMap<OwnerId, OwnerContribution>>,
    next_sequence: u64,
}

impl IntentAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `round` can take one more intent.
    ///
    /// # Errors
    /// - `RoundFrozen` if the round left Collecting
    /// - `RoundFull` if the round holds `max_intents` already
    pub fn check_accepting(round: &Round, max_intents: usize) -> Result<()> {
        if !round.is_collecting() {
            return Err(VeilError::RoundFrozen { round: round.index });
        }
        if usize::try_from(round.intent_count).unwrap_or(usize::MAX) >= max_intents {
            return Err(VeilError::RoundFull { round: round.index });
        }
        Ok(())
    }

    /// Fold one intent into `round`.
    ///
    /// All homomorphic work happens before the round is touched, so a
    /// backend error leaves both the round and the aggregator unchanged.
    #[allow(clippy::too_many_arguments)]
    pub fn fold<F: FheBackend>(
        &mut self,
        fhe: &mut F,
        round: &mut Round,
        max_intents: usize,
        owner: OwnerId,
        direction: Direction,
        amount: CipherHandle,
        now: DateTime<Utc>,
    ) -> Result<Intent> {
        Self::check_accepting(round, max_intents)?;

        let bias = fhe.trivial(ENCODING_BIAS)?;
        let contribution = match direction {
            Direction::Credit => fhe.add(bias, amount)?,
            Direction::Debit => fhe.sub(bias, amount)?,
        };
        let aggregate = fhe.add(round.aggregate, contribution)?;

        let existing = self
            .contributions
            .get(&round.index)
            .and_then(|m| m.get(&owner))
            .and_then(|c| match direction {
                Direction::Credit => c.credit,
                Direction::Debit => c.debit,
            });
        let owner_total = match existing {
            Some(total) => fhe.add(total, amount)?,
            None => amount,
        };

        let intent = Intent {
            owner,
            round: round.index,
            direction,
            amount,
            contribution,
            sequence: self.next_sequence,
            submitted_at: now,
        };

        round.aggregate = aggregate;
        round.intent_count += 1;
        round.participants.insert(owner);
        self.next_sequence += 1;

        let slot = self
            .contributions
            .entry(round.index)
            .or_default()
            .entry(owner)
            .or_default();
        match direction {
            Direction::Credit => slot.credit = Some(owner_total),
            Direction::Debit => slot.debit = Some(owner_total),
        }
        self.intents
            .entry(round.index)
            .or_default()
            .push(intent.clone());

        debug!(
            module = %round.module,
            round = %round.index,
            %direction,
            intents = round.intent_count,
            participants = round.participant_count(),
            aggregate = %aggregate.short(),
            "intent folded"
        );
        Ok(intent)
    }

    /// Retained intents of a round, in arrival order.
    #[must_use]
    pub fn intents(&self, round: RoundId) -> &[Intent] {
        self.intents.get(&round).map_or(&[], Vec::as_slice)
    }

    /// An owner's encrypted totals in a round (the `userAmounts` read).
    #[must_use]
    pub fn contribution(&self, round: RoundId, owner: OwnerId) -> Option<&OwnerContribution> {
        self.contributions.get(&round)?.get(&owner)
    }

    /// Whether the owner has at least one intent recorded in the round.
    #[must_use]
    pub fn has_intent(&self, round: RoundId, owner: OwnerId) -> bool {
        self.contribution(round, owner).is_some()
    }

    /// Encrypted amounts of all credit intents in a round.
    pub fn credit_amounts(&self, round: RoundId) -> impl Iterator<Item = CipherHandle> + '_ {
        self.amounts(round, Direction::Credit)
    }

    /// Encrypted amounts of all debit intents in a round.
    pub fn debit_amounts(&self, round: RoundId) -> impl Iterator<Item = CipherHandle> + '_ {
        self.amounts(round, Direction::Debit)
    }

    fn amounts(&self, round: RoundId, direction: Direction) -> impl Iterator<Item = CipherHandle> + '_ {
        self.intents(round)
            .iter()
            .filter(move |i| i.direction == direction)
            .map(|i| i.amount)
    }
}

#[cfg(test)]
mod tests {
    use veilround_types::sim::SimFhe;
    use veilround_types::{ModuleId, SignedEncoding};

    use super::*;

    fn open_round(fhe: &mut SimFhe) -> Round {
        let zero = fhe.trivial(0).unwrap();
        Round::open(ModuleId(1), RoundId::GENESIS, zero, Utc::now())
    }

    fn decode(fhe: &SimFhe, round: &Round) -> i128 {
        SignedEncoding::decode(fhe.peek(round.aggregate).unwrap(), round.intent_count).unwrap()
    }

    #[test]
    fn supply_and_withdraw_net_out() {
        let mut fhe = SimFhe::new(1);
        let mut agg = IntentAggregator::new();
        let mut round = open_round(&mut fhe);
        let (u1, u2) = (OwnerId::new(), OwnerId::new());

        let a = fhe.trivial(100).unwrap();
        let b = fhe.trivial(40).unwrap();
        agg.fold(&mut fhe, &mut round, 10, u1, Direction::Credit, a, Utc::now())
            .unwrap();
        agg.fold(&mut fhe, &mut round, 10, u2, Direction::Debit, b, Utc::now())
            .unwrap();

        assert_eq!(decode(&fhe, &round), 60);
        assert_eq!(round.participant_count(), 2);
        assert_eq!(agg.intents(RoundId::GENESIS).len(), 2);
        assert_eq!(agg.credit_amounts(RoundId::GENESIS).collect::<Vec<_>>(), vec![a]);
        assert_eq!(agg.debit_amounts(RoundId::GENESIS).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn participants_deduplicated_by_owner() {
        let mut fhe = SimFhe::new(2);
        let mut agg = IntentAggregator::new();
        let mut round = open_round(&mut fhe);
        let u = OwnerId::new();
        for v in [10, 20, 30] {
            let h = fhe.trivial(v).unwrap();
            agg.fold(&mut fhe, &mut round, 10, u, Direction::Credit, h, Utc::now())
                .unwrap();
        }
        assert_eq!(round.participant_count(), 1);
        assert_eq!(round.intent_count, 3);
        let total = agg.contribution(RoundId::GENESIS, u).unwrap().credit.unwrap();
        assert_eq!(fhe.peek(total), Some(60));
        assert_eq!(decode(&fhe, &round), 60);
    }

    #[test]
    fn frozen_round_rejects_intents() {
        let mut fhe = SimFhe::new(3);
        let mut agg = IntentAggregator::new();
        let mut round = open_round(&mut fhe);
        round.state = veilround_types::RoundState::QuorumMet;
        let before = round.aggregate;
        let h = fhe.trivial(5).unwrap();
        let err = agg
            .fold(&mut fhe, &mut round, 10, OwnerId::new(), Direction::Credit, h, Utc::now())
            .unwrap_err();
        assert!(matches!(err, VeilError::RoundFrozen { .. }));
        assert_eq!(round.aggregate, before);
        assert!(agg.intents(RoundId::GENESIS).is_empty());
    }

    #[test]
    fn full_round_rejects_intents() {
        let mut fhe = SimFhe::new(4);
        let mut agg = IntentAggregator::new();
        let mut round = open_round(&mut fhe);
        let h = fhe.trivial(5).unwrap();
        agg.fold(&mut fhe, &mut round, 1, OwnerId::new(), Direction::Credit, h, Utc::now())
            .unwrap();
        let err = agg
            .fold(&mut fhe, &mut round, 1, OwnerId::new(), Direction::Credit, h, Utc::now())
            .unwrap_err();
        assert!(matches!(err, VeilError::RoundFull { .. }));
    }

    #[test]
    fn sequences_are_monotonic_across_rounds() {
        let mut fhe = SimFhe::new(5);
        let mut agg = IntentAggregator::new();
        let mut r0 = open_round(&mut fhe);
        let zero = fhe.trivial(0).unwrap();
        let mut r1 = Round::open(ModuleId(1), RoundId(1), zero, Utc::now());
        let h = fhe.trivial(1).unwrap();
        let a = agg
            .fold(&mut fhe, &mut r0, 10, OwnerId::new(), Direction::Credit, h, Utc::now())
            .unwrap();
        let b = agg
            .fold(&mut fhe, &mut r1, 10, OwnerId::new(), Direction::Credit, h, Utc::now())
            .unwrap();
        assert!(b.sequence > a.sequence);
        assert_eq!(agg.debit_amounts(RoundId(1)).count(), 0);
    }
}
