//! Settlement guard: at most one venue execution per round.
//!
//! Each (module, round) pair moves through:
//!
//! ```text
//! (absent) --begin--> InFlight --complete--> Settled
//!                        |
//!                        +----abort----> (absent)
//! ```
//!
//! A second `begin` on an in-flight round returns `SettlementInProgress`;
//! on a settled round it returns `AlreadySettled`. Entries are never
//! evicted: a settled round must stay settled for the life of the state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use veilround_types::{ModuleId, Result, RoundId, VeilError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardState {
    InFlight,
    Settled,
}

/// Exactly-once gate in front of venue execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementGuard {
    rounds: BTreeMap<ModuleId, BTreeMap<RoundId, GuardState>>,
}

impl SettlementGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to execute a round.
    ///
    /// # Errors
    /// - `AlreadySettled` if the round already completed
    /// - `SettlementInProgress` if another execution holds it
    pub fn begin(&mut self, module: ModuleId, round: RoundId) -> Result<()> {
        let slot = self.rounds.entry(module).or_default();
        match slot.get(&round) {
            Some(GuardState::Settled) => Err(VeilError::AlreadySettled { round }),
            Some(GuardState::InFlight) => Err(VeilError::SettlementInProgress { round }),
            None => {
                slot.insert(round, GuardState::InFlight);
                Ok(())
            }
        }
    }

    /// Release an in-flight round after a failed execution.
    pub fn abort(&mut self, module: ModuleId, round: RoundId) {
        if let Some(slot) = self.rounds.get_mut(&module) {
            if slot.get(&round) == Some(&GuardState::InFlight) {
                slot.remove(&round);
            }
        }
    }

    /// Mark an in-flight round settled.
    ///
    /// # Errors
    /// `InvariantViolation` if the round was not in flight.
    pub fn complete(&mut self, module: ModuleId, round: RoundId) -> Result<()> {
        let slot = self.rounds.entry(module).or_default();
        match slot.get(&round) {
            Some(GuardState::InFlight) => {
                slot.insert(round, GuardState::Settled);
                Ok(())
            }
            other => Err(VeilError::InvariantViolation {
                reason: format!("{module} {round} completed from {other:?}"),
            }),
        }
    }

    #[must_use]
    pub fn state(&self, module: ModuleId, round: RoundId) -> Option<GuardState> {
        self.rounds.get(&module)?.get(&round).copied()
    }

    #[must_use]
    pub fn is_settled(&self, module: ModuleId, round: RoundId) -> bool {
        self.state(module, round) == Some(GuardState::Settled)
    }

    /// Rounds left in flight (for example by a crash mid-execution).
    pub fn in_flight(&self) -> impl Iterator<Item = (ModuleId, RoundId)> + '_ {
        self.rounds.iter().flat_map(|(m, rounds)| {
            rounds
                .iter()
                .filter(|(_, s)| **s == GuardState::InFlight)
                .map(move |(r, _)| (*m, *r))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_begin_ok() {
        let mut guard = SettlementGuard::new();
        guard.begin(ModuleId(1), RoundId(1)).unwrap();
        assert_eq!(
            guard.state(ModuleId(1), RoundId(1)),
            Some(GuardState::InFlight)
        );
    }

    #[test]
    fn concurrent_begin_blocked() {
        let mut guard = SettlementGuard::new();
        guard.begin(ModuleId(1), RoundId(1)).unwrap();
        let err = guard.begin(ModuleId(1), RoundId(1)).unwrap_err();
        assert!(
            matches!(err, VeilError::SettlementInProgress { round } if round == RoundId(1)),
            "expected SettlementInProgress, got: {err:?}"
        );
    }

    #[test]
    fn settled_round_stays_settled() {
        let mut guard = SettlementGuard::new();
        guard.begin(ModuleId(1), RoundId(1)).unwrap();
        guard.complete(ModuleId(1), RoundId(1)).unwrap();
        assert!(guard.is_settled(ModuleId(1), RoundId(1)));
        let err = guard.begin(ModuleId(1), RoundId(1)).unwrap_err();
        assert!(matches!(err, VeilError::AlreadySettled { .. }));
        guard.abort(ModuleId(1), RoundId(1));
        assert!(guard.is_settled(ModuleId(1), RoundId(1)));
    }

    #[test]
    fn abort_allows_retry() {
        let mut guard = SettlementGuard::new();
        guard.begin(ModuleId(1), RoundId(2)).unwrap();
        guard.abort(ModuleId(1), RoundId(2));
        assert_eq!(guard.state(ModuleId(1), RoundId(2)), None);
        assert!(guard.begin(ModuleId(1), RoundId(2)).is_ok());
    }

    #[test]
    fn modules_are_independent() {
        let mut guard = SettlementGuard::new();
        guard.begin(ModuleId(1), RoundId(1)).unwrap();
        guard.begin(ModuleId(2), RoundId(1)).unwrap();
        let stuck: Vec<_> = guard.in_flight().collect();
        assert_eq!(stuck.len(), 2);
    }

    #[test]
    fn complete_without_begin_is_fatal() {
        let mut guard = SettlementGuard::new();
        let err = guard.complete(ModuleId(1), RoundId(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn guard_serde_roundtrip() {
        let mut guard = SettlementGuard::new();
        guard.begin(ModuleId(3), RoundId(4)).unwrap();
        guard.complete(ModuleId(3), RoundId(4)).unwrap();
        let json = serde_json::to_string(&guard).unwrap();
        let back: SettlementGuard = serde_json::from_str(&json).unwrap();
        assert_eq!(guard, back);
    }
}
