//! The round-batching engine.
//!
//! One generic engine serves every module. Lending and swap modules share
//! the same round machine and differ only in their [`ModuleKind`], which
//! selects the venue action and the distribution pricing.
//!
//! ```text
//! submit_intent ──▶ IntentAggregator.fold ──▶ advance_round ──▶ request_decryption
//!                                                                     │
//!        claim ◀── ClaimBook ◀── compute_distribution ◀── settle_round ◀┘
//! ```
//!
//! All mutation goes through `&mut self`: the engine is a single writer.
//! [`SharedEngine`](crate::SharedEngine) serializes concurrent callers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use veilround_distribution::compute_distribution;
use veilround_ingress::{IntentAggregator, PositionLedger};
use veilround_settlement::{
    AuditReport, ConservationLedger, GatewayClient, PendingAudit, SettlementExecutor,
    SettlementGuard,
};
use veilround_types::{
    Allocation, CapitalVenue, CipherHandle, ConfidentialLedger, DecryptionOracle,
    DecryptionProof, Direction, EncryptedInput, EngineConfig, FailureRecord, FheBackend,
    GatewayConfig, InboundTransfer, InputContext, Intent, ModuleConfig, ModuleId, ModuleKind,
    OwnerId,
    PendingDecryption, Result, Round, RoundId, RoundState, SettlementKey, SettlementResult,
    SignedEncoding, VeilError, VenueReceipt,
};

use crate::module::ModuleState;

/// Round-batching engine over pluggable collaborators.
///
/// - `F`: homomorphic backend
/// - `O`: decryption oracle (behind a verifying [`GatewayClient`])
/// - `V`: capital venue (lending pool or exchange)
/// - `L`: confidential-token ledger
pub struct RoundEngine<F, O, V, L> {
    pub(crate) fhe: F,
    pub(crate) gateway: GatewayClient<O>,
    pub(crate) gateway_config: GatewayConfig,
    pub(crate) venue: V,
    pub(crate) ledger: L,
    pub(crate) modules: BTreeMap<ModuleId, ModuleState>,
    pub(crate) positions: PositionLedger,
    pub(crate) conservation: ConservationLedger,
    pub(crate) guard: SettlementGuard,
}

impl<F, O, V, L> RoundEngine<F, O, V, L>
where
    F: FheBackend,
    O: DecryptionOracle,
    V: CapitalVenue,
    L: ConfidentialLedger,
{
    /// Build an engine and open the genesis round of every configured module.
    ///
    /// # Errors
    /// `Configuration` if the config is invalid.
    pub fn new(
        config: &EngineConfig,
        fhe: F,
        oracle: O,
        venue: V,
        ledger: L,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        config.validate()?;
        let gateway = GatewayClient::new(oracle, &config.gateway)?;
        let mut engine = Self {
            fhe,
            gateway,
            gateway_config: config.gateway.clone(),
            venue,
            ledger,
            modules: BTreeMap::new(),
            positions: PositionLedger::new(),
            conservation: ConservationLedger::new(),
            guard: SettlementGuard::new(),
        };
        for module in &config.modules {
            engine.register_module(module.clone(), now)?;
        }
        info!(modules = engine.modules.len(), "round engine started");
        Ok(engine)
    }

    /// Register a module and open its genesis round.
    ///
    /// # Errors
    /// - `DuplicateModule` if the id is taken
    /// - `Configuration` if the module config is invalid
    pub fn register_module(&mut self, config: ModuleConfig, now: DateTime<Utc>) -> Result<()> {
        if self.modules.contains_key(&config.id) {
            return Err(VeilError::DuplicateModule(config.id));
        }
        let id = config.id;
        let state = ModuleState::open(&mut self.fhe, config, now)?;
        info!(module = %id, name = %state.config.name, kind = ?state.config.kind, "module registered");
        self.modules.insert(id, state);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------

    /// Submit an encrypted intent into the module's Collecting round.
    ///
    /// Credits move funds through the confidential ledger first and are then
    /// folded via [`RoundEngine::on_confidential_transfer`]. Debits go
    /// through [`RoundEngine::request_withdraw`].
    ///
    /// # Errors
    /// - `UnknownModule`, `RoundFrozen`, `RoundFull`
    /// - `InvalidInputProof` if the input is not bound to (owner, module)
    /// - `UnsupportedDirection` for debits on a swap module
    pub fn submit_intent(
        &mut self,
        module: ModuleId,
        owner: OwnerId,
        direction: Direction,
        input: &EncryptedInput,
        now: DateTime<Utc>,
    ) -> Result<Intent> {
        match direction {
            Direction::Credit => {
                let state = self.module(module)?;
                IntentAggregator::check_accepting(state.coordinator.current()?, state.max_intents())?;
                let asset = state.config.kind.input_asset().to_string();
                let transfer = self.ledger.transfer_in(&asset, owner, module, input)?;
                self.on_confidential_transfer(&transfer, now)
            }
            Direction::Debit => self.request_withdraw(module, owner, input, now),
        }
    }

    /// Ledger callback: a confidential transfer reached a module's custody.
    ///
    /// The receipt is redeemed with the ledger before anything is folded, so
    /// only amounts the ledger really moved can enter an aggregate. Lending
    /// positions are credited at once. If the intent cannot be folded the
    /// moved amount is sent back to the owner.
    ///
    /// # Errors
    /// - `UnknownModule` if the receipt names no module
    /// - `UnverifiedTransfer` for a wrong asset or a receipt the ledger
    ///   did not issue (or already redeemed)
    /// - `RoundFrozen`, `RoundFull` (after refunding)
    pub fn on_confidential_transfer(
        &mut self,
        transfer: &InboundTransfer,
        now: DateTime<Utc>,
    ) -> Result<Intent> {
        let module = transfer.to;
        let expected = self.module(module)?.config.kind.input_asset();
        if transfer.asset != expected {
            return Err(VeilError::UnverifiedTransfer {
                reason: format!("{module} takes {expected}, not {}", transfer.asset),
            });
        }
        self.ledger.acknowledge(transfer)?;
        self.fold_credit(transfer, now).inspect_err(|e| self.refund(transfer, e))
    }

    fn fold_credit(&mut self, transfer: &InboundTransfer, now: DateTime<Utc>) -> Result<Intent> {
        let (module, owner) = (transfer.to, transfer.from);
        let state = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        let credited = if state.config.kind.keeps_positions() {
            Some(
                self.positions
                    .plan_credit(&mut self.fhe, module, owner, transfer.moved)?,
            )
        } else {
            None
        };
        let max = state.max_intents();
        let round = state.coordinator.current_mut()?;
        let intent = state.aggregator.fold(
            &mut self.fhe,
            round,
            max,
            owner,
            Direction::Credit,
            transfer.moved,
            now,
        )?;
        if let Some(balance) = credited {
            self.positions.apply_credit(module, owner, balance, now);
        }
        Ok(intent)
    }

    fn refund(&mut self, transfer: &InboundTransfer, cause: &VeilError) {
        let (module, owner) = (transfer.to, transfer.from);
        match self
            .ledger
            .transfer_out(&transfer.asset, module, owner, transfer.moved)
        {
            Ok(_) => warn!(%module, %owner, error = %cause, "credit refused; transfer refunded"),
            Err(e) => {
                error!(%module, %owner, error = %e, cause = %cause, "refund of refused credit failed");
            }
        }
    }

    /// Debit intent: withdraw from the owner's encrypted position.
    ///
    /// The requested amount is clamped to the position and escrowed at once.
    /// Nothing is mutated unless the fold succeeds.
    pub fn request_withdraw(
        &mut self,
        module: ModuleId,
        owner: OwnerId,
        input: &EncryptedInput,
        now: DateTime<Utc>,
    ) -> Result<Intent> {
        let state = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        if !state.config.kind.accepts_debits() {
            return Err(VeilError::UnsupportedDirection {
                module,
                direction: Direction::Debit,
            });
        }
        let max = state.max_intents();
        IntentAggregator::check_accepting(state.coordinator.current()?, max)?;

        let requested = self.fhe.verify_input(input, &InputContext { owner, module })?;
        let planned = self
            .positions
            .plan_debit(&mut self.fhe, module, owner, requested)?;
        let round = state.coordinator.current_mut()?;
        let intent = state.aggregator.fold(
            &mut self.fhe,
            round,
            max,
            owner,
            Direction::Debit,
            planned.effective,
            now,
        )?;
        self.positions.apply_debit(&planned, now);
        Ok(intent)
    }

    // -----------------------------------------------------------------
    // Round transitions
    // -----------------------------------------------------------------

    /// Freeze the Collecting round now.
    pub fn advance_round(&mut self, module: ModuleId) -> Result<RoundId> {
        self.advance_round_at(module, Utc::now())
    }

    /// Freeze the Collecting round if quorum and time allow at `now`.
    ///
    /// # Errors
    /// - `RoundAlreadyPending` if a frozen round is still unsettled
    /// - `RoundNotReady` otherwise when the predicate fails
    pub fn advance_round_at(&mut self, module: ModuleId, now: DateTime<Utc>) -> Result<RoundId> {
        let state = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        let current = state.coordinator.current_index();
        let intents = state.aggregator.intents(current);
        state.coordinator.advance(&mut self.fhe, intents, now)
    }

    /// Ask the gateway to decrypt the pending round's aggregate.
    ///
    /// The request is persisted on the round; calling again re-issues it.
    ///
    /// # Errors
    /// - `NoPendingRound` if no round awaits settlement
    /// - `SettlementInProgress` if the pending round is executing
    /// - retryable `GatewayFailure`
    pub fn request_decryption(
        &mut self,
        module: ModuleId,
        now: DateTime<Utc>,
    ) -> Result<PendingDecryption> {
        let state = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        let index = match state.coordinator.pending() {
            Some(round) if round.state == RoundState::QuorumMet => round.index,
            Some(round) => return Err(VeilError::SettlementInProgress { round: round.index }),
            None => return Err(VeilError::NoPendingRound { module }),
        };
        let round = state.coordinator.round_mut(index)?;
        if let Some(pending) = round.decryption.as_mut() {
            self.gateway.re_request(pending)?;
            return Ok(pending.clone());
        }
        let pending = self.gateway.request(round.aggregate, now)?;
        round.decryption = Some(pending.clone());
        Ok(pending)
    }

    // -----------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------

    /// Apply a verified decryption of a frozen aggregate.
    ///
    /// The round is located by the proof's handle. On success the venue has
    /// been called exactly once and the round's allocations are claimable.
    ///
    /// # Errors
    /// - `HandleMismatch` if the proof is for no frozen aggregate of the module
    /// - `WrongRoundState` if it is for the Collecting round
    /// - `AlreadySettled` / `SettlementInProgress` (no venue call)
    /// - `ProofInvalid` if the proof does not verify
    /// - venue or ledger errors, after which the round is back in QuorumMet
    pub fn settle_round(
        &mut self,
        module: ModuleId,
        clear: u128,
        proof: &DecryptionProof,
        now: DateTime<Utc>,
    ) -> Result<SettlementResult> {
        let state = self.module(module)?;
        let round = Self::round_for_proof(state, proof)?;
        let (index, aggregate, terms) = (round.index, round.aggregate, round.intent_count);
        match round.state {
            RoundState::Settled => return Err(VeilError::AlreadySettled { round: index }),
            RoundState::Executing => return Err(VeilError::SettlementInProgress { round: index }),
            RoundState::Collecting | RoundState::QuorumMet => {}
        }
        let kind = state.config.kind.clone();

        let verified = self.gateway.verify(aggregate, clear, proof)?;
        let net = SignedEncoding::decode(verified.clear, terms)?;

        self.guard.begin(module, index)?;
        if let Err(e) = self.enter_executing(module, index, net, &verified.proof) {
            self.guard.abort(module, index);
            return Err(e);
        }

        let key = SettlementKey::deterministic(module, index);
        let receipt = match SettlementExecutor::execute(
            &mut self.venue,
            &mut self.ledger,
            module,
            &kind,
            net,
            key,
            now,
        ) {
            Ok(receipt) => receipt,
            Err(e) => {
                self.roll_back(module, index, &e.to_string(), now);
                return Err(e);
            }
        };

        self.finish_settlement(module, index, &kind, net, receipt, now)
            .inspect_err(|e| {
                error!(%module, round = %index, error = %e, "distribution failed after venue execution");
            })
    }

    fn round_for_proof<'a>(state: &'a ModuleState, proof: &DecryptionProof) -> Result<&'a Round> {
        if let Some(round) = state.coordinator.find_by_aggregate(proof.handle) {
            return Ok(round);
        }
        let current = state.coordinator.current()?;
        if current.aggregate == proof.handle {
            return Err(VeilError::WrongRoundState {
                round: current.index,
                expected: RoundState::QuorumMet,
                actual: RoundState::Collecting,
            });
        }
        let expected = state
            .coordinator
            .pending()
            .map_or(current.aggregate, |r| r.aggregate);
        warn!(
            module = %state.config.id,
            actual = %proof.handle.short(),
            "decryption proof matches no frozen round"
        );
        Err(VeilError::HandleMismatch {
            expected,
            actual: proof.handle,
        })
    }

    fn enter_executing(
        &mut self,
        module: ModuleId,
        index: RoundId,
        net: i128,
        proof: &DecryptionProof,
    ) -> Result<()> {
        let state = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        let round = state.coordinator.transition(index, RoundState::Executing)?;
        round.clear_aggregate = Some(net);
        round.proof = Some(proof.clone());
        info!(%module, round = %index, net, "round executing");
        Ok(())
    }

    fn roll_back(&mut self, module: ModuleId, index: RoundId, reason: &str, now: DateTime<Utc>) {
        self.guard.abort(module, index);
        let Some(state) = self.modules.get_mut(&module) else {
            return;
        };
        match state.coordinator.transition(index, RoundState::QuorumMet) {
            Ok(round) => {
                let attempts = round.failure.as_ref().map_or(0, |f| f.attempts) + 1;
                round.failure = Some(FailureRecord {
                    attempts,
                    last_error: reason.to_string(),
                    failed_at: now,
                });
                warn!(%module, round = %index, attempts, error = reason, "venue execution failed; round rolled back");
            }
            Err(e) => {
                error!(%module, round = %index, error = %e, "rollback after venue failure failed");
            }
        }
    }

    fn finish_settlement(
        &mut self,
        module: ModuleId,
        index: RoundId,
        kind: &ModuleKind,
        net: i128,
        receipt: VenueReceipt,
        now: DateTime<Utc>,
    ) -> Result<SettlementResult> {
        let state = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        let distribution = compute_distribution(
            &mut self.fhe,
            module,
            kind,
            index,
            state.aggregator.intents(index),
            net,
            receipt.proceeds(),
        )?;
        let pricing = distribution.pricing;
        let allocations = distribution.allocations.len();
        state.claims.record(index, distribution.allocations)?;

        let result = SettlementResult {
            module,
            round: index,
            clear_net: net,
            requested: pricing.requested,
            received: pricing.received,
            distributable: pricing.distributable,
            reserve: pricing.reserve,
            position_delta: distribution.position_delta,
            dust_allowance: distribution.dust_allowance,
            receipt,
            distribution_root: distribution.root,
            settled_at: now,
        };
        state.coordinator.transition(index, RoundState::Settled)?;
        state.settlements.insert(index, result.clone());
        self.conservation
            .record_settlement(module, result.position_delta, result.dust_allowance);
        self.guard.complete(module, index)?;

        info!(
            %module,
            round = %index,
            net,
            requested = result.requested,
            received = result.received,
            reserve = result.reserve,
            allocations,
            "round settled"
        );
        Ok(result)
    }

    /// Operator recovery of a round left Executing by an interrupted run.
    ///
    /// Rolls the round back to QuorumMet so `settle_round` can retry with
    /// the same settlement key.
    ///
    /// # Errors
    /// `NoPendingRound` if no round of the module is executing.
    pub fn recover_executing(&mut self, module: ModuleId, now: DateTime<Utc>) -> Result<RoundId> {
        let state = self.module(module)?;
        let index = state
            .coordinator
            .rounds()
            .find(|r| r.state == RoundState::Executing)
            .map(|r| r.index)
            .ok_or(VeilError::NoPendingRound { module })?;
        self.roll_back(module, index, "recovered after interrupted execution", now);
        info!(%module, round = %index, "executing round recovered");
        Ok(index)
    }

    // -----------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------

    /// Claim an owner's allocation of a settled round.
    ///
    /// A payout is transferred to the owner's wallet in the module's output
    /// asset. Returns the allocation.
    ///
    /// # Errors
    /// - `UnknownRound` if the round never existed
    /// - `NoPositionInRound` if the owner had no intent in it
    /// - `WrongRoundState` if the round is not settled yet
    /// - `ClaimedTwice` on a repeat claim
    pub fn claim(
        &mut self,
        module: ModuleId,
        owner: OwnerId,
        round: RoundId,
        now: DateTime<Utc>,
    ) -> Result<Allocation> {
        let state = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        if !state.claims.is_distributed(round) {
            let actual = state.coordinator.round(round)?.state;
            if !state.aggregator.has_intent(round, owner) {
                return Err(VeilError::NoPositionInRound { round, owner });
            }
            return Err(VeilError::WrongRoundState {
                round,
                expected: RoundState::Settled,
                actual,
            });
        }

        if let Some(payout) = state.claims.pending(round, owner)?.payout {
            let asset = state.config.kind.output_asset();
            self.ledger.transfer_out(asset, module, owner, payout)?;
        }
        let allocation = state.claims.complete(round, owner)?;
        info!(%module, %round, %owner, paid = allocation.payout.is_some(), at = %now, "allocation claimed");
        Ok(allocation)
    }

    // -----------------------------------------------------------------
    // Conservation audit
    // -----------------------------------------------------------------

    /// Compute the encrypted supply difference and request its decryption.
    pub fn prepare_conservation_audit(
        &mut self,
        module: ModuleId,
        now: DateTime<Utc>,
    ) -> Result<PendingAudit> {
        let state = self
            .modules
            .get(&module)
            .ok_or(VeilError::UnknownModule(module))?;
        let mut in_flight: Vec<CipherHandle> = Vec::new();
        let mut actual: Vec<CipherHandle> = Vec::new();
        if state.config.kind.keeps_positions() {
            actual.extend(self.positions.balances(module));
            for round in state.coordinator.rounds() {
                if round.state != RoundState::Settled {
                    in_flight.extend(state.aggregator.credit_amounts(round.index));
                    actual.extend(state.aggregator.debit_amounts(round.index));
                }
            }
        } else {
            actual.extend(state.claims.payouts());
        }
        let audit = self
            .conservation
            .prepare(&mut self.fhe, module, in_flight, actual, now)?;
        self.gateway.request(audit.handle, now)?;
        Ok(audit)
    }

    /// Check the decrypted difference of the pending audit.
    ///
    /// # Errors
    /// - `NoPendingAudit`, `HandleMismatch`, `ProofInvalid`
    /// - `ConservationViolation` if positions drifted beyond the dust allowance
    pub fn verify_conservation_audit(
        &mut self,
        module: ModuleId,
        clear: u128,
        proof: &DecryptionProof,
    ) -> Result<AuditReport> {
        self.module(module)?;
        let handle = self
            .conservation
            .pending(module)
            .map(|a| a.handle)
            .ok_or(VeilError::NoPendingAudit { module })?;
        let verified = self.gateway.verify(handle, clear, proof)?;
        self.conservation.verify(module, &verified)
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// # Errors
    /// `UnknownModule` if no module has this id.
    pub fn module(&self, id: ModuleId) -> Result<&ModuleState> {
        self.modules.get(&id).ok_or(VeilError::UnknownModule(id))
    }

    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.keys().copied()
    }

    #[must_use]
    pub fn gateway(&self) -> &GatewayClient<O> {
        &self.gateway
    }

    #[must_use]
    pub fn fhe(&self) -> &F {
        &self.fhe
    }

    #[must_use]
    pub fn venue(&self) -> &V {
        &self.venue
    }

    #[must_use]
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    #[must_use]
    pub fn position_ledger(&self) -> &PositionLedger {
        &self.positions
    }

    #[must_use]
    pub fn conservation(&self) -> &ConservationLedger {
        &self.conservation
    }

    #[must_use]
    pub fn guard(&self) -> &SettlementGuard {
        &self.guard
    }
}
