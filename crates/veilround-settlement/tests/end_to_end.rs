//! End-to-end integration tests across the three planes.
//!
//! These tests drive one module through the full round lifecycle:
//! Intake Plane (ingress) -> Compute Plane (distribution) -> Finality Plane
//! (settlement)
//!
//! They check that the planes agree on netting, pro-rata distribution,
//! exactly-once execution and position conservation.

use chrono::Utc;
use veilround_distribution::{ClaimBook, compute_distribution};
use veilround_ingress::{IntentAggregator, PositionLedger, RoundCoordinator};
use veilround_settlement::{
    ConservationLedger, GatewayClient, SettlementExecutor, SettlementGuard,
};
use veilround_types::sim::{SimFhe, SimLedger, SimVenue};
use veilround_types::*;

/// Helper: one module wired to simulated collaborators.
struct RoundPipeline {
    fhe: SimFhe,
    venue: SimVenue,
    ledger: SimLedger,
    gateway: GatewayClient<SimFhe>,
    module: ModuleId,
    kind: ModuleKind,
    positions: PositionLedger,
    coord: RoundCoordinator,
    agg: IntentAggregator,
    claims: ClaimBook,
    guard: SettlementGuard,
    supply: ConservationLedger,
}

impl RoundPipeline {
    fn new(kind: ModuleKind) -> Self {
        let mut fhe = SimFhe::new(2024);
        let module = ModuleId(7);
        let gateway = GatewayClient::new(
            fhe.clone(),
            &GatewayConfig {
                trusted_signers: vec![fhe.oracle_public_key_hex()],
                retry: RetryPolicy::default(),
            },
        )
        .unwrap();
        let coord =
            RoundCoordinator::open(&mut fhe, module, RoundConfig::immediate(2), Utc::now())
                .unwrap();
        Self {
            venue: SimVenue::new(),
            ledger: SimLedger::new(fhe.clone()),
            gateway,
            fhe,
            module,
            kind,
            positions: PositionLedger::new(),
            coord,
            agg: IntentAggregator::new(),
            claims: ClaimBook::new(),
            guard: SettlementGuard::new(),
            supply: ConservationLedger::new(),
        }
    }

    fn ctx(&self, owner: OwnerId) -> InputContext {
        InputContext {
            owner,
            module: self.module,
        }
    }

    fn deposit(&mut self, owner: OwnerId, amount: u64) {
        let asset = self.kind.input_asset().to_string();
        self.ledger.mint(&asset, owner, u128::from(amount));
        let input = self.fhe.encrypt_input(amount, self.ctx(owner));
        let transfer = self
            .ledger
            .transfer_in(&asset, owner, self.module, &input)
            .unwrap();
        self.ledger.acknowledge(&transfer).unwrap();
        let max = self.coord.config().max_intents_per_round;
        let round = self.coord.current_mut().unwrap();
        self.agg
            .fold(
                &mut self.fhe,
                round,
                max,
                owner,
                Direction::Credit,
                transfer.moved,
                Utc::now(),
            )
            .unwrap();
        if self.kind.keeps_positions() {
            self.positions
                .credit(&mut self.fhe, self.module, owner, transfer.moved, Utc::now())
                .unwrap();
        }
    }

    fn withdraw(&mut self, owner: OwnerId, amount: u64) {
        let input = self.fhe.encrypt_input(amount, self.ctx(owner));
        let requested = self.fhe.verify_input(&input, &self.ctx(owner)).unwrap();
        let planned = self
            .positions
            .plan_debit(&mut self.fhe, self.module, owner, requested)
            .unwrap();
        let max = self.coord.config().max_intents_per_round;
        let round = self.coord.current_mut().unwrap();
        self.agg
            .fold(
                &mut self.fhe,
                round,
                max,
                owner,
                Direction::Debit,
                planned.effective,
                Utc::now(),
            )
            .unwrap();
        self.positions.apply_debit(&planned, Utc::now());
    }

    fn advance(&mut self) -> RoundId {
        let current = self.coord.current_index();
        let intents = self.agg.intents(current).to_vec();
        self.coord
            .advance(&mut self.fhe, &intents, Utc::now())
            .unwrap()
    }

    /// Decrypt, execute and distribute a frozen round.
    fn settle(&mut self, frozen: RoundId) -> Result<VenueReceipt> {
        let round = self.coord.round(frozen)?.clone();
        self.gateway.request(round.aggregate, Utc::now())?;
        let verified = self.gateway.poll(round.aggregate)?.expect("oracle has no latency");
        let net = SignedEncoding::decode(verified.clear, round.intent_count)?;

        self.guard.begin(self.module, frozen)?;
        self.coord.transition(frozen, RoundState::Executing)?;
        let key = SettlementKey::deterministic(self.module, frozen);
        let receipt = match SettlementExecutor::execute(
            &mut self.venue,
            &mut self.ledger,
            self.module,
            &self.kind,
            net,
            key,
            Utc::now(),
        ) {
            Ok(receipt) => receipt,
            Err(e) => {
                self.coord.transition(frozen, RoundState::QuorumMet)?;
                self.guard.abort(self.module, frozen);
                return Err(e);
            }
        };

        let intents = self.agg.intents(frozen).to_vec();
        let distribution = compute_distribution(
            &mut self.fhe,
            self.module,
            &self.kind,
            frozen,
            &intents,
            net,
            receipt.proceeds(),
        )?;
        self.claims.record(frozen, distribution.allocations)?;
        self.supply.record_settlement(
            self.module,
            distribution.position_delta,
            distribution.dust_allowance,
        );
        self.coord.transition(frozen, RoundState::Settled)?;
        self.guard.complete(self.module, frozen)?;
        Ok(receipt)
    }

    fn claim(&mut self, owner: OwnerId, round: RoundId) -> Result<()> {
        if let Some(payout) = self.claims.pending(round, owner)?.payout {
            let asset = self.kind.output_asset().to_string();
            self.ledger
                .transfer_out(&asset, self.module, owner, payout)?;
        }
        self.claims.complete(round, owner)?;
        Ok(())
    }

    fn audit(&mut self) -> Result<veilround_settlement::AuditReport> {
        let mut in_flight: Vec<CipherHandle> = Vec::new();
        let mut actual: Vec<CipherHandle> = Vec::new();
        if self.kind.keeps_positions() {
            actual.extend(self.positions.balances(self.module));
            for round in self.coord.rounds() {
                if round.state != RoundState::Settled {
                    in_flight.extend(self.agg.credit_amounts(round.index));
                    actual.extend(self.agg.debit_amounts(round.index));
                }
            }
        } else {
            actual.extend(self.claims.payouts());
        }
        let pending = self
            .supply
            .prepare(&mut self.fhe, self.module, in_flight, actual, Utc::now())?;
        self.gateway.request(pending.handle, Utc::now())?;
        let verified = self.gateway.poll(pending.handle)?.expect("oracle has no latency");
        self.supply.verify(self.module, &verified)
    }

    fn position(&self, owner: OwnerId) -> Option<u128> {
        let pos = self.positions.get(self.module, owner)?;
        self.fhe.peek(pos.balance)
    }

    fn wallet(&self, asset: &str, owner: OwnerId) -> u128 {
        self.ledger.balance(asset, LedgerAccount::Owner(owner))
    }
}

fn lending() -> ModuleKind {
    ModuleKind::Lending {
        asset: "cUSDC".into(),
    }
}

// =============================================================================
// Test: two suppliers, one net supply, positions credited on deposit
// =============================================================================
#[test]
fn e2e_two_suppliers() {
    let mut p = RoundPipeline::new(lending());
    let (u1, u2) = (OwnerId::new(), OwnerId::new());
    p.deposit(u1, 100);
    p.deposit(u2, 50);
    assert_eq!(p.position(u1), Some(100));
    // Collecting credits are offset as in flight.
    assert_eq!(p.audit().unwrap().drift, 0);
    let frozen = p.advance();

    let receipt = p.settle(frozen).unwrap();
    assert_eq!(
        receipt.action,
        VenueAction::Supply {
            asset: "cUSDC".into(),
            amount: 150
        }
    );
    assert_eq!(p.venue.supplied("cUSDC"), 150);

    assert_eq!(p.audit().unwrap().drift, 0);

    p.claim(u1, frozen).unwrap();
    p.claim(u2, frozen).unwrap();
    assert_eq!(p.wallet("cUSDC", u1), 0);
    assert_eq!(p.position(u1), Some(100));
    assert_eq!(p.position(u2), Some(50));
    assert_eq!(p.audit().unwrap().expected, 150);
}

// =============================================================================
// Test: a withdraw netted against a supply is paid at par without touching
// the pool
// =============================================================================
#[test]
fn e2e_netted_withdraw() {
    let mut p = RoundPipeline::new(lending());
    let (u1, u2, u3) = (OwnerId::new(), OwnerId::new(), OwnerId::new());
    p.deposit(u1, 100);
    p.deposit(u2, 50);
    let r0 = p.advance();
    p.settle(r0).unwrap();
    p.claim(u1, r0).unwrap();
    p.claim(u2, r0).unwrap();

    p.withdraw(u1, 40);
    p.deposit(u3, 100);
    // Escrowed debit is still counted while the round collects.
    assert_eq!(p.audit().unwrap().drift, 0);

    let r1 = p.advance();
    let receipt = p.settle(r1).unwrap();
    assert_eq!(receipt.proceeds(), 60);
    assert_eq!(p.venue.supplied("cUSDC"), 210);

    p.claim(u1, r1).unwrap();
    p.claim(u3, r1).unwrap();
    assert_eq!(p.wallet("cUSDC", u1), 40);
    assert_eq!(p.position(u1), Some(60));
    assert_eq!(p.position(u3), Some(100));
    assert_eq!(p.audit().unwrap().expected, 210);
}

// =============================================================================
// Test: venue shortfall on a net withdraw is shared pro rata
// =============================================================================
#[test]
fn e2e_withdraw_shortfall() {
    let mut p = RoundPipeline::new(lending());
    let (u1, u2) = (OwnerId::new(), OwnerId::new());
    p.deposit(u1, 100);
    p.deposit(u2, 100);
    let r0 = p.advance();
    p.settle(r0).unwrap();
    p.claim(u1, r0).unwrap();
    p.claim(u2, r0).unwrap();

    p.venue.set_withdraw_bps(9_000);
    p.withdraw(u1, 100);
    p.withdraw(u2, 100);
    let r1 = p.advance();
    let receipt = p.settle(r1).unwrap();
    assert_eq!(receipt.proceeds(), 180);

    p.claim(u1, r1).unwrap();
    p.claim(u2, r1).unwrap();
    assert_eq!(p.wallet("cUSDC", u1), 90);
    assert_eq!(p.wallet("cUSDC", u2), 90);
    assert_eq!(p.position(u1), Some(0));
    assert_eq!(p.audit().unwrap().drift, 0);
}

// =============================================================================
// Test: swap module floors payouts and keeps bounded dust
// =============================================================================
#[test]
fn e2e_swap_with_dust() {
    let mut p = RoundPipeline::new(ModuleKind::Swap {
        asset_in: "cUSDC".into(),
        asset_out: "cUNI".into(),
    });
    p.venue.set_rate("cUSDC", "cUNI", 10, 3);
    let owners: Vec<OwnerId> = (0..3).map(|_| OwnerId::new()).collect();
    for o in &owners {
        p.deposit(*o, 10);
    }
    let r0 = p.advance();
    assert_eq!(p.settle(r0).unwrap().proceeds(), 100);

    // Unclaimed payouts already count toward conservation.
    assert_eq!(p.audit().unwrap().drift, 1);
    for o in &owners {
        p.claim(*o, r0).unwrap();
        assert_eq!(p.wallet("cUNI", *o), 33);
        assert_eq!(p.position(*o), None);
    }
    assert_eq!(p.ledger.balance("cUNI", LedgerAccount::Module(p.module)), 1);
    let report = p.audit().unwrap();
    assert_eq!(report.drift, 1);
    assert!(report.drift <= report.dust_allowance);
}

// =============================================================================
// Test: a settled round cannot execute twice
// =============================================================================
#[test]
fn e2e_double_settlement_blocked() {
    let mut p = RoundPipeline::new(lending());
    p.deposit(OwnerId::new(), 10);
    p.deposit(OwnerId::new(), 20);
    let r0 = p.advance();
    p.settle(r0).unwrap();

    let err = p.settle(r0).unwrap_err();
    assert!(matches!(err, VeilError::AlreadySettled { .. }));
    assert_eq!(p.venue.calls().len(), 1);
}

// =============================================================================
// Test: a failed venue call rolls back and the retry executes once
// =============================================================================
#[test]
fn e2e_venue_failure_then_retry() {
    let mut p = RoundPipeline::new(lending());
    let u = OwnerId::new();
    p.deposit(u, 10);
    p.deposit(OwnerId::new(), 20);
    let r0 = p.advance();
    assert_eq!(p.position(u), Some(10));

    p.venue.fail_next(1);
    let err = p.settle(r0).unwrap_err();
    assert!(matches!(err, VeilError::VenueFailure { .. }));
    assert_eq!(p.coord.round(r0).unwrap().state, RoundState::QuorumMet);
    assert!(matches!(
        p.claim(u, r0).unwrap_err(),
        VeilError::NoPositionInRound { .. }
    ));

    assert_eq!(p.audit().unwrap().drift, 0);

    p.settle(r0).unwrap();
    assert_eq!(p.venue.calls().len(), 1);
    p.claim(u, r0).unwrap();
    assert_eq!(p.position(u), Some(10));
    assert_eq!(p.audit().unwrap().expected, 30);
}

// =============================================================================
// Test: the audit catches inflated positions
// =============================================================================
#[test]
fn e2e_audit_detects_inflation() {
    let mut p = RoundPipeline::new(lending());
    let u = OwnerId::new();
    p.deposit(u, 100);
    p.deposit(OwnerId::new(), 50);
    let r0 = p.advance();
    p.settle(r0).unwrap();
    p.claim(u, r0).unwrap();

    let forged = p.fhe.store(5);
    p.positions
        .credit(&mut p.fhe, p.module, OwnerId::new(), forged, Utc::now())
        .unwrap();
    let err = p.audit().unwrap_err();
    assert!(matches!(err, VeilError::ConservationViolation { .. }));
}
