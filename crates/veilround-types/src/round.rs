//! Round lifecycle types.
//!
//! Each module runs a sequence of rounds, each cycling once through
//! **COLLECTING → QUORUM_MET → EXECUTING → SETTLED**.
//!
//! During COLLECTING, intents fold into the running aggregate.
//! Leaving COLLECTING freezes membership and opens the next round.
//! QUORUM_MET waits for a verified decryption of the aggregate.
//! EXECUTING brackets the single venue call; a venue failure rolls back
//! to QUORUM_MET. SETTLED is terminal and immutable.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CipherHandle, DecryptionProof, ModuleId, OwnerId, RoundId};

/// The four states of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundState {
    /// Accepting intents.
    Collecting,
    /// Frozen; waiting for the aggregate decryption and settlement.
    QuorumMet,
    /// The venue call is in flight.
    Executing,
    /// Executed exactly once; immutable.
    Settled,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collecting => write!(f, "COLLECTING"),
            Self::QuorumMet => write!(f, "QUORUM_MET"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Settled => write!(f, "SETTLED"),
        }
    }
}

impl RoundState {
    /// Whether `self → next` is a legal transition.
    ///
    /// `Executing → QuorumMet` is the rollback taken on venue failure.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Collecting, Self::QuorumMet)
                | (Self::QuorumMet, Self::Executing)
                | (Self::Executing, Self::Settled | Self::QuorumMet)
        )
    }

    /// Frozen but not yet settled.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::QuorumMet | Self::Executing)
    }
}

/// A decryption request recorded on the round so it survives restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDecryption {
    /// Handle whose clear value was requested (the frozen aggregate).
    pub handle: CipherHandle,
    pub requested_at: DateTime<Utc>,
    /// How many times the request has been (re)issued.
    pub requests: u32,
}

/// Last venue failure recorded after a rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// One batching window of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub module: ModuleId,
    pub index: RoundId,
    pub state: RoundState,
    pub opened_at: DateTime<Utc>,
    /// When the round left Collecting.
    pub frozen_at: Option<DateTime<Utc>>,
    /// Distinct owners that submitted at least one intent.
    pub participants: BTreeSet<OwnerId>,
    /// Number of intents folded (the public term count for decoding).
    pub intent_count: u64,
    /// Running (then frozen) biased aggregate.
    pub aggregate: CipherHandle,
    /// SHA-256 commitment to the ordered intents, set when frozen.
    pub intent_root: Option<[u8; 32]>,
    /// Decoded signed net, set once a verified decryption is applied.
    pub clear_aggregate: Option<i128>,
    pub decryption: Option<PendingDecryption>,
    pub proof: Option<DecryptionProof>,
    pub failure: Option<FailureRecord>,
}

impl Round {
    /// Open a fresh Collecting round over an encrypted-zero aggregate.
    #[must_use]
    pub fn open(
        module: ModuleId,
        index: RoundId,
        zero: CipherHandle,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            module,
            index,
            state: RoundState::Collecting,
            opened_at,
            frozen_at: None,
            participants: BTreeSet::new(),
            intent_count: 0,
            aggregate: zero,
            intent_root: None,
            clear_aggregate: None,
            decryption: None,
            proof: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.state == RoundState::Collecting
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Whole seconds since the round opened (0 if the clock went backwards).
    #[must_use]
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.opened_at).num_seconds()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use RoundState::*;
        assert!(Collecting.can_transition_to(QuorumMet));
        assert!(QuorumMet.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Settled));
        assert!(Executing.can_transition_to(QuorumMet));
    }

    #[test]
    fn illegal_transitions() {
        use RoundState::*;
        assert!(!Collecting.can_transition_to(Settled));
        assert!(!Collecting.can_transition_to(Executing));
        assert!(!QuorumMet.can_transition_to(Settled));
        assert!(!Settled.can_transition_to(Collecting));
        assert!(!Settled.can_transition_to(QuorumMet));
    }

    #[test]
    fn round_state_display() {
        assert_eq!(format!("{}", RoundState::Collecting), "COLLECTING");
        assert_eq!(format!("{}", RoundState::QuorumMet), "QUORUM_MET");
        assert_eq!(format!("{}", RoundState::Executing), "EXECUTING");
        assert_eq!(format!("{}", RoundState::Settled), "SETTLED");
    }

    #[test]
    fn open_round_is_empty_collecting() {
        let now = Utc::now();
        let round = Round::open(ModuleId(1), RoundId::GENESIS, CipherHandle([0; 32]), now);
        assert!(round.is_collecting());
        assert_eq!(round.participant_count(), 0);
        assert_eq!(round.intent_count, 0);
        assert_eq!(round.elapsed_secs(now + chrono::Duration::seconds(30)), 30);
        assert_eq!(round.elapsed_secs(now - chrono::Duration::seconds(30)), 0);
    }

    #[test]
    fn round_serde_roundtrip() {
        let mut round = Round::open(ModuleId(2), RoundId(5), CipherHandle([3; 32]), Utc::now());
        round.participants.insert(OwnerId::new());
        round.intent_root = Some([9; 32]);
        round.clear_aggregate = Some(-42);
        let json = serde_json::to_string(&round).unwrap();
        let back: Round = serde_json::from_str(&json).unwrap();
        assert_eq!(round, back);
    }
}
