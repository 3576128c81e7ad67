//! Round coordinator: the per-module round state machine.
//!
//! Rounds are stored as an arena keyed by [`RoundId`]. Exactly one round is
//! Collecting at any time, and at most one round is in flight (QuorumMet or
//! Executing). Leaving Collecting is an on-demand predicate, never a timer:
//! any caller may ask to advance, and the request either succeeds once or
//! fails cleanly.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use veilround_types::{
    CipherHandle, FheBackend, Intent, ModuleId, Result, Round, RoundConfig, RoundId, RoundState,
    VeilError, short_hex,
};

use crate::round_sealer::RoundSealer;

/// State machine over one module's rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCoordinator {
    module: ModuleId,
    config: RoundConfig,
    rounds: BTreeMap<RoundId, Round>,
    current: RoundId,
}

impl RoundCoordinator {
    /// Open the genesis round of a module.
    pub fn open<F: FheBackend>(
        fhe: &mut F,
        module: ModuleId,
        config: RoundConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let zero = fhe.trivial(0)?;
        let genesis = Round::open(module, RoundId::GENESIS, zero, now);
        info!(%module, round = %genesis.index, "genesis round opened");
        Ok(Self {
            module,
            config,
            rounds: BTreeMap::from([(RoundId::GENESIS, genesis)]),
            current: RoundId::GENESIS,
        })
    }

    #[must_use]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    #[must_use]
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Index of the Collecting round.
    #[must_use]
    pub fn current_index(&self) -> RoundId {
        self.current
    }

    /// The Collecting round.
    ///
    /// # Errors
    /// `InvariantViolation` if the arena lost the current round.
    pub fn current(&self) -> Result<&Round> {
        self.round(self.current)
    }

    /// Mutable access to the Collecting round (for intent folding).
    pub fn current_mut(&mut self) -> Result<&mut Round> {
        let index = self.current;
        self.rounds
            .get_mut(&index)
            .ok_or_else(|| VeilError::InvariantViolation {
                reason: format!("{} lost its collecting {index}", self.module),
            })
    }

    /// # Errors
    /// `UnknownRound` if no round has this index.
    pub fn round(&self, index: RoundId) -> Result<&Round> {
        self.rounds.get(&index).ok_or(VeilError::UnknownRound {
            module: self.module,
            round: index,
        })
    }

    /// # Errors
    /// `UnknownRound` if no round has this index.
    pub fn round_mut(&mut self, index: RoundId) -> Result<&mut Round> {
        self.rounds.get_mut(&index).ok_or(VeilError::UnknownRound {
            module: self.module,
            round: index,
        })
    }

    /// All rounds, oldest first.
    pub fn rounds(&self) -> impl Iterator<Item = &Round> {
        self.rounds.values()
    }

    /// The frozen round awaiting settlement, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&Round> {
        self.rounds.values().find(|r| r.state.is_in_flight())
    }

    /// The round whose frozen aggregate is `handle`.
    #[must_use]
    pub fn find_by_aggregate(&self, handle: CipherHandle) -> Option<&Round> {
        self.rounds
            .values()
            .find(|r| !r.is_collecting() && r.aggregate == handle)
    }

    /// Check the quorum/time predicate of the Collecting round.
    ///
    /// # Errors
    /// - `RoundAlreadyPending` if another round is still in flight
    /// - `RoundNotReady` if quorum or minimum collecting time is not reached
    pub fn check_advance(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(pending) = self.pending() {
            return Err(VeilError::RoundAlreadyPending {
                pending: pending.index,
            });
        }
        let current = self.current()?;
        let elapsed = current.elapsed_secs(now);
        let required = self.config.min_time_between_rounds.as_secs();
        let participants = current.participant_count();
        if participants < self.config.min_distinct_users || elapsed < required {
            return Err(VeilError::RoundNotReady {
                round: current.index,
                participants,
                required_participants: self.config.min_distinct_users,
                elapsed_secs: elapsed,
                required_secs: required,
            });
        }
        Ok(())
    }

    /// Whether [`RoundCoordinator::advance`] would succeed at `now`.
    #[must_use]
    pub fn can_advance(&self, now: DateTime<Utc>) -> bool {
        self.check_advance(now).is_ok()
    }

    /// Time left before the minimum collecting time elapses.
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = self
            .current()
            .map_or(0, |round| round.elapsed_secs(now));
        self.config
            .min_time_between_rounds
            .saturating_sub(Duration::from_secs(elapsed))
    }

    /// Freeze the Collecting round and open the next one.
    ///
    /// `intents` are the frozen round's retained intents; they are sealed
    /// into its `intent_root`. Returns the index of the frozen round.
    pub fn advance<F: FheBackend>(
        &mut self,
        fhe: &mut F,
        intents: &[Intent],
        now: DateTime<Utc>,
    ) -> Result<RoundId> {
        if let Err(err) = self.check_advance(now) {
            warn!(module = %self.module, error = %err, "advance rejected");
            return Err(err);
        }

        let frozen = self.current;
        let next = frozen.next();
        let zero = fhe.trivial(0)?;
        let root = RoundSealer::intent_root(self.module, frozen, intents);

        let round = self.current_mut()?;
        round.state = RoundState::QuorumMet;
        round.frozen_at = Some(now);
        round.intent_root = Some(root);
        let (participants, intent_count) = (round.participant_count(), round.intent_count);

        self.rounds
            .insert(next, Round::open(self.module, next, zero, now));
        self.current = next;

        info!(
            module = %self.module,
            round = %frozen,
            participants,
            intents = intent_count,
            root = %short_hex(&root),
            next = %next,
            "round frozen; quorum met"
        );
        Ok(frozen)
    }

    /// Move a frozen round to `next`, enforcing the legal transitions.
    ///
    /// # Errors
    /// `WrongRoundState` if the transition is not allowed.
    pub fn transition(&mut self, index: RoundId, next: RoundState) -> Result<&mut Round> {
        let round = self.round_mut(index)?;
        if !round.state.can_transition_to(next) {
            return Err(VeilError::WrongRoundState {
                round: index,
                expected: next,
                actual: round.state,
            });
        }
        round.state = next;
        Ok(round)
    }
}
