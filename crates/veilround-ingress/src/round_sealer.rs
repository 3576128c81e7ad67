//! Round sealer: commits to a round's frozen intent membership.
//!
//! When a round leaves Collecting, its intents are ordered by arrival
//! sequence and hashed into an `intent_root`. Anyone holding the retained
//! intents can recompute the root and confirm nothing was added or dropped
//! after the freeze.

use sha2::{Digest, Sha256};
use veilround_types::{Direction, Intent, ModuleId, RoundId};

/// Produces and verifies intent roots.
pub struct RoundSealer;

impl RoundSealer {
    /// SHA-256 over the ordered intents of one round.
    ///
    /// Commits to module, round, intent count, and for each intent its
    /// sequence, owner, direction, amount handle, and contribution handle.
    #[must_use]
    pub fn intent_root(module: ModuleId, round: RoundId, intents: &[Intent]) -> [u8; 32] {
        let mut ordered: Vec<&Intent> = intents.iter().collect();
        ordered.sort_by_key(|i| i.sequence);

        let mut hasher = Sha256::new();
        hasher.update(b"veilround:round:v1:");
        hasher.update(module.0.to_le_bytes());
        hasher.update(round.0.to_le_bytes());
        hasher.update((ordered.len() as u64).to_le_bytes());

        for intent in ordered {
            hasher.update(intent.sequence.to_le_bytes());
            hasher.update(intent.owner.0.as_bytes());
            hasher.update(match intent.direction {
                Direction::Credit => [0u8],
                Direction::Debit => [1u8],
            });
            hasher.update(intent.amount.as_bytes());
            hasher.update(intent.contribution.as_bytes());
        }

        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Whether `root` matches the given intents.
    #[must_use]
    pub fn verify(module: ModuleId, round: RoundId, intents: &[Intent], root: &[u8; 32]) -> bool {
        Self::intent_root(module, round, intents) == *root
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use veilround_types::{CipherHandle, OwnerId};

    use super::*;

    fn intent(seq: u64, byte: u8) -> Intent {
        Intent {
            owner: OwnerId::from_bytes([byte; 16]),
            round: RoundId(1),
            direction: Direction::Credit,
            amount: CipherHandle([byte; 32]),
            contribution: CipherHandle([byte.wrapping_add(1); 32]),
            sequence: seq,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn empty_root_is_not_zero() {
        let root = RoundSealer::intent_root(ModuleId(1), RoundId(1), &[]);
        assert_ne!(root, [0u8; 32]);
    }

    #[test]
    fn root_ignores_storage_order() {
        let a = vec![intent(0, 1), intent(1, 2)];
        let b = vec![intent(1, 2), intent(0, 1)];
        assert_eq!(
            RoundSealer::intent_root(ModuleId(1), RoundId(1), &a),
            RoundSealer::intent_root(ModuleId(1), RoundId(1), &b)
        );
    }

    #[test]
    fn different_rounds_different_root() {
        let intents = vec![intent(0, 1)];
        assert_ne!(
            RoundSealer::intent_root(ModuleId(1), RoundId(1), &intents),
            RoundSealer::intent_root(ModuleId(1), RoundId(2), &intents)
        );
    }

    #[test]
    fn dropped_intent_fails_verification() {
        let intents = vec![intent(0, 1), intent(1, 2)];
        let root = RoundSealer::intent_root(ModuleId(1), RoundId(1), &intents);
        assert!(RoundSealer::verify(ModuleId(1), RoundId(1), &intents, &root));
        assert!(!RoundSealer::verify(ModuleId(1), RoundId(1), &intents[..1], &root));
    }
}
