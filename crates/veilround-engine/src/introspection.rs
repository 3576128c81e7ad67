//! Read-only round introspection.
//!
//! These reads back the countdown and status views of a client: the
//! current round, its participants and timing, the pending aggregate and
//! the clear round-level totals once a round has settled. None of them
//! reveals an individual clear amount; per-owner values are handles.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veilround_ingress::OwnerContribution;
use veilround_types::{
    CapitalVenue, CipherHandle, ConfidentialLedger, DecryptionOracle, FheBackend, LedgerAccount,
    ModuleId, OwnerId, Result, Round, RoundId, RoundState, SettlementResult,
};

use crate::RoundEngine;

/// Per-round status view (the `positions(round)` read).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub module: ModuleId,
    pub round: RoundId,
    pub state: RoundState,
    pub opened_at: DateTime<Utc>,
    pub participants: usize,
    pub intents: u64,
    /// Frozen (or running) aggregate handle.
    pub aggregate: CipherHandle,
    pub clear_net: Option<i128>,
    pub requested: Option<u128>,
    pub received: Option<u128>,
    pub reserve: Option<u128>,
    pub failed_attempts: u32,
}

impl<F, O, V, L> RoundEngine<F, O, V, L>
where
    F: FheBackend,
    O: DecryptionOracle,
    V: CapitalVenue,
    L: ConfidentialLedger,
{
    /// Index of the Collecting round.
    pub fn current_round(&self, module: ModuleId) -> Result<RoundId> {
        Ok(self.module(module)?.coordinator.current_index())
    }

    /// When the Collecting round opened.
    pub fn last_update_time(&self, module: ModuleId) -> Result<DateTime<Utc>> {
        Ok(self.module(module)?.coordinator.current()?.opened_at)
    }

    /// Distinct owners in the Collecting round.
    pub fn current_number_of_users(&self, module: ModuleId) -> Result<usize> {
        Ok(self.module(module)?.coordinator.current()?.participant_count())
    }

    pub fn min_distinct_users(&self, module: ModuleId) -> Result<usize> {
        Ok(self.module(module)?.config.round.min_distinct_users)
    }

    pub fn min_time_between_rounds(&self, module: ModuleId) -> Result<Duration> {
        Ok(self.module(module)?.config.round.min_time_between_rounds)
    }

    /// Aggregate handle of the round awaiting settlement.
    pub fn next_round_delta(&self, module: ModuleId) -> Result<Option<CipherHandle>> {
        Ok(self
            .module(module)?
            .coordinator
            .pending()
            .map(|r| r.aggregate))
    }

    /// `|net|` sent to the venue for a settled round.
    pub fn total_requested_amount(&self, module: ModuleId, round: RoundId) -> Result<Option<u128>> {
        Ok(self.settlement(module, round)?.map(|s| s.requested))
    }

    /// Amount the venue returned for a settled round.
    pub fn total_received_amount(&self, module: ModuleId, round: RoundId) -> Result<Option<u128>> {
        Ok(self.settlement(module, round)?.map(|s| s.received))
    }

    /// An owner's encrypted credit/debit totals in a round.
    pub fn user_amounts(
        &self,
        module: ModuleId,
        round: RoundId,
        owner: OwnerId,
    ) -> Result<Option<&OwnerContribution>> {
        Ok(self.module(module)?.aggregator.contribution(round, owner))
    }

    pub fn round(&self, module: ModuleId, round: RoundId) -> Result<&Round> {
        self.module(module)?.coordinator.round(round)
    }

    pub fn settlement(&self, module: ModuleId, round: RoundId) -> Result<Option<&SettlementResult>> {
        Ok(self.module(module)?.settlements.get(&round))
    }

    /// Status summary of one round.
    pub fn positions(&self, module: ModuleId, round: RoundId) -> Result<RoundSummary> {
        let r = self.round(module, round)?;
        let settled = self.settlement(module, round)?;
        Ok(RoundSummary {
            module,
            round,
            state: r.state,
            opened_at: r.opened_at,
            participants: r.participant_count(),
            intents: r.intent_count,
            aggregate: r.aggregate,
            clear_net: r.clear_aggregate,
            requested: settled.map(|s| s.requested),
            received: settled.map(|s| s.received),
            reserve: settled.map(|s| s.reserve),
            failed_attempts: r.failure.as_ref().map_or(0, |f| f.attempts),
        })
    }

    /// An owner's encrypted position in the module.
    pub fn confidential_balance_of(
        &self,
        module: ModuleId,
        owner: OwnerId,
    ) -> Result<Option<CipherHandle>> {
        self.module(module)?;
        Ok(self.positions.get(module, owner).map(|p| p.balance))
    }

    /// An owner's confidential wallet balance of the module's output asset.
    pub fn wallet_balance_of(&self, module: ModuleId, owner: OwnerId) -> Result<Option<CipherHandle>> {
        let asset = self.module(module)?.config.kind.output_asset();
        self.ledger
            .confidential_balance_of(asset, LedgerAccount::Owner(owner))
    }

    /// Time left before the Collecting round may advance on time alone.
    pub fn time_remaining(&self, module: ModuleId, now: DateTime<Utc>) -> Result<Duration> {
        Ok(self.module(module)?.coordinator.time_remaining(now))
    }

    /// Whether `advance_round_at(module, now)` would succeed.
    pub fn can_advance(&self, module: ModuleId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.module(module)?.coordinator.can_advance(now))
    }
}
