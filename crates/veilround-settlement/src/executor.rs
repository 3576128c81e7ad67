//! Settlement executor: the single venue interaction of a round.
//!
//! Only the clear net of a round ever reaches the venue:
//!
//! | module  | net > 0                          | net < 0                  |
//! |---------|----------------------------------|--------------------------|
//! | lending | unwrap, supply                   | withdraw, wrap received  |
//! | swap    | unwrap A, swap A→B, wrap B       | invariant violation      |
//!
//! A zero net produces a `NoOp` receipt and never calls the venue.
//! If the venue call fails after an unwrap, the unwrapped amount is wrapped
//! back so the module's confidential balance is left as it was.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use veilround_types::{
    CapitalVenue, ConfidentialLedger, ModuleId, ModuleKind, Result, SettlementKey, VeilError,
    VenueAction, VenueReceipt,
};

/// Stateless driver of venue and ledger for one round.
pub struct SettlementExecutor;

impl SettlementExecutor {
    /// Execute the round's net against the venue.
    ///
    /// # Errors
    /// - `VenueFailure` / `LedgerFailure` from the collaborators (state is
    ///   compensated so the same key can be retried)
    /// - `InvariantViolation` for a negative swap net
    #[allow(clippy::too_many_arguments)]
    pub fn execute<V: CapitalVenue, L: ConfidentialLedger>(
        venue: &mut V,
        ledger: &mut L,
        module: ModuleId,
        kind: &ModuleKind,
        net: i128,
        key: SettlementKey,
        now: DateTime<Utc>,
    ) -> Result<VenueReceipt> {
        let amount = net.unsigned_abs();
        let action = match (kind, net.signum()) {
            (_, 0) => VenueAction::NoOp,
            (ModuleKind::Lending { asset }, 1) => {
                ledger.unwrap(asset, module, amount)?;
                if let Err(e) = venue.supply(asset, amount, key) {
                    Self::compensate(ledger, asset, module, amount);
                    return Err(e);
                }
                VenueAction::Supply {
                    asset: asset.clone(),
                    amount,
                }
            }
            (ModuleKind::Lending { asset }, _) => {
                let received = venue.withdraw(asset, amount, key)?;
                ledger.wrap(asset, module, received)?;
                if received < amount {
                    warn!(%module, requested = amount, received, "venue returned less than requested");
                }
                VenueAction::Withdraw {
                    asset: asset.clone(),
                    requested: amount,
                    received,
                }
            }
            (
                ModuleKind::Swap {
                    asset_in,
                    asset_out,
                },
                1,
            ) => {
                ledger.unwrap(asset_in, module, amount)?;
                let amount_out = match venue.swap(asset_in, amount, asset_out, key) {
                    Ok(out) => out,
                    Err(e) => {
                        Self::compensate(ledger, asset_in, module, amount);
                        return Err(e);
                    }
                };
                ledger.wrap(asset_out, module, amount_out)?;
                VenueAction::Swap {
                    asset_in: asset_in.clone(),
                    amount_in: amount,
                    asset_out: asset_out.clone(),
                    amount_out,
                }
            }
            (ModuleKind::Swap { .. }, _) => {
                return Err(VeilError::InvariantViolation {
                    reason: format!("{module} swap round decoded to negative net {net}"),
                });
            }
        };

        let receipt = VenueReceipt {
            key,
            action,
            executed_at: now,
        };
        info!(
            %module,
            net,
            proceeds = receipt.proceeds(),
            touched_venue = receipt.touched_venue(),
            "venue execution complete"
        );
        Ok(receipt)
    }

    fn compensate<L: ConfidentialLedger>(ledger: &mut L, asset: &str, module: ModuleId, amount: u128) {
        if let Err(e) = ledger.wrap(asset, module, amount) {
            error!(%module, asset, amount, error = %e, "failed to re-wrap after venue failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use veilround_types::sim::{SimFhe, SimLedger, SimVenue, VenueCall};
    use veilround_types::{InputContext, LedgerAccount, OwnerId, RoundId};

    use super::*;

    const M: ModuleId = ModuleId(1);

    fn lending() -> ModuleKind {
        ModuleKind::Lending {
            asset: "cUSDC".into(),
        }
    }

    fn swap() -> ModuleKind {
        ModuleKind::Swap {
            asset_in: "cUSDC".into(),
            asset_out: "cUNI".into(),
        }
    }

    struct Rig {
        fhe: SimFhe,
        venue: SimVenue,
        ledger: SimLedger,
    }

    impl Rig {
        fn new() -> Self {
            let fhe = SimFhe::new(11);
            Self {
                venue: SimVenue::new(),
                ledger: SimLedger::new(fhe.clone()),
                fhe,
            }
        }

        fn fund_module(&self, asset: &str, amount: u64) {
            let owner = OwnerId::new();
            self.ledger.mint(asset, owner, u128::from(amount));
            let input = self
                .fhe
                .encrypt_input(amount, InputContext { owner, module: M });
            let mut ledger = self.ledger.clone();
            ledger.transfer_in(asset, owner, M, &input).unwrap();
        }

        fn run(&self, kind: &ModuleKind, net: i128, round: u64) -> Result<VenueReceipt> {
            let mut venue = self.venue.clone();
            let mut ledger = self.ledger.clone();
            SettlementExecutor::execute(
                &mut venue,
                &mut ledger,
                M,
                kind,
                net,
                SettlementKey::deterministic(M, RoundId(round)),
                Utc::now(),
            )
        }
    }

    #[test]
    fn zero_net_is_noop() {
        let rig = Rig::new();
        let receipt = rig.run(&lending(), 0, 1).unwrap();
        assert_eq!(receipt.action, VenueAction::NoOp);
        assert!(rig.venue.calls().is_empty());
    }

    #[test]
    fn positive_lending_net_supplies() {
        let rig = Rig::new();
        rig.fund_module("cUSDC", 150);
        let receipt = rig.run(&lending(), 150, 1).unwrap();
        assert_eq!(receipt.proceeds(), 150);
        assert_eq!(rig.venue.supplied("cUSDC"), 150);
        assert_eq!(rig.ledger.balance("cUSDC", LedgerAccount::Module(M)), 0);
    }

    #[test]
    fn negative_lending_net_withdraws_and_wraps() {
        let rig = Rig::new();
        rig.venue.seed_liquidity("cUSDC", 100);
        rig.venue.set_withdraw_bps(9_000);
        let receipt = rig.run(&lending(), -100, 1).unwrap();
        assert_eq!(receipt.proceeds(), 90);
        assert_eq!(rig.ledger.balance("cUSDC", LedgerAccount::Module(M)), 90);
    }

    #[test]
    fn swap_converts_input_to_output() {
        let rig = Rig::new();
        rig.fund_module("cUSDC", 30);
        rig.venue.set_rate("cUSDC", "cUNI", 10, 3);
        let receipt = rig.run(&swap(), 30, 1).unwrap();
        assert_eq!(receipt.proceeds(), 100);
        assert_eq!(rig.ledger.balance("cUNI", LedgerAccount::Module(M)), 100);
    }

    #[test]
    fn negative_swap_net_is_fatal() {
        let rig = Rig::new();
        let err = rig.run(&swap(), -5, 1).unwrap_err();
        assert!(err.is_fatal());
        assert!(rig.venue.calls().is_empty());
    }

    #[test]
    fn venue_failure_rewraps_input() {
        let rig = Rig::new();
        rig.fund_module("cUSDC", 50);
        rig.venue.fail_next(1);
        let err = rig.run(&lending(), 50, 1).unwrap_err();
        assert!(matches!(err, VeilError::VenueFailure { .. }));
        assert_eq!(rig.ledger.balance("cUSDC", LedgerAccount::Module(M)), 50);

        // Retrying with the same key succeeds and supplies exactly once.
        rig.run(&lending(), 50, 1).unwrap();
        assert_eq!(
            rig.venue.calls(),
            vec![VenueCall::Supply {
                asset: "cUSDC".into(),
                amount: 50,
                key: SettlementKey::deterministic(M, RoundId(1)),
            }]
        );
    }

    #[test]
    fn insufficient_module_balance_fails_before_venue() {
        let rig = Rig::new();
        let err = rig.run(&lending(), 10, 1).unwrap_err();
        assert!(matches!(err, VeilError::LedgerFailure { .. }));
        assert!(rig.venue.calls().is_empty());
    }
}
