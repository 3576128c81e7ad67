//! Encrypted position ledger for the intake plane.
//!
//! Tracks one encrypted balance per (module, owner). Balances are only ever
//! combined homomorphically; the ledger never sees a clear amount.
//! Debits are two-step (plan, then apply) so a caller can abort between
//! the homomorphic computation and the mutation without leaving a trace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use veilround_types::{CipherHandle, FheBackend, ModuleId, OwnerId, Position, Result};

/// A debit computed against a position but not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDebit {
    pub module: ModuleId,
    pub owner: OwnerId,
    /// `min(requested, balance)`: what will actually leave the position.
    pub effective: CipherHandle,
    /// Balance after the debit.
    pub new_balance: CipherHandle,
}

/// Source of truth for encrypted positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLedger {
    positions: BTreeMap<ModuleId, BTreeMap<OwnerId, Position>>,
}

impl PositionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of an owner in a module, if one was ever opened.
    #[must_use]
    pub fn get(&self, module: ModuleId, owner: OwnerId) -> Option<&Position> {
        self.positions.get(&module)?.get(&owner)
    }

    /// Homomorphically add `amount` to the owner's position.
    ///
    /// Opens the position if absent. Returns the new balance handle.
    pub fn credit<F: FheBackend>(
        &mut self,
        fhe: &mut F,
        module: ModuleId,
        owner: OwnerId,
        amount: CipherHandle,
        now: DateTime<Utc>,
    ) -> Result<CipherHandle> {
        let balance = self.plan_credit(fhe, module, owner, amount)?;
        self.apply_credit(module, owner, balance, now);
        Ok(balance)
    }

    /// Balance the position would have after crediting `amount`.
    pub fn plan_credit<F: FheBackend>(
        &self,
        fhe: &mut F,
        module: ModuleId,
        owner: OwnerId,
        amount: CipherHandle,
    ) -> Result<CipherHandle> {
        match self.get(module, owner) {
            Some(pos) => fhe.add(pos.balance, amount),
            None => Ok(amount),
        }
    }

    /// Commit a balance computed by [`PositionLedger::plan_credit`].
    pub fn apply_credit(
        &mut self,
        module: ModuleId,
        owner: OwnerId,
        balance: CipherHandle,
        now: DateTime<Utc>,
    ) {
        self.set_balance(module, owner, balance, now);
        debug!(%module, %owner, balance = %balance.short(), "position credited");
    }

    /// Clamp `requested` to the owner's balance and compute the new balance.
    ///
    /// Nothing is mutated; call [`PositionLedger::apply_debit`] to commit.
    /// An owner with no position debits an encrypted zero.
    pub fn plan_debit<F: FheBackend>(
        &self,
        fhe: &mut F,
        module: ModuleId,
        owner: OwnerId,
        requested: CipherHandle,
    ) -> Result<PlannedDebit> {
        let balance = match self.get(module, owner) {
            Some(pos) => pos.balance,
            None => fhe.trivial(0)?,
        };
        let effective = fhe.min(requested, balance)?;
        let new_balance = fhe.sub(balance, effective)?;
        Ok(PlannedDebit {
            module,
            owner,
            effective,
            new_balance,
        })
    }

    /// Commit a planned debit.
    pub fn apply_debit(&mut self, planned: &PlannedDebit, now: DateTime<Utc>) {
        self.set_balance(planned.module, planned.owner, planned.new_balance, now);
        debug!(
            module = %planned.module,
            owner = %planned.owner,
            balance = %planned.new_balance.short(),
            "position debited into escrow"
        );
    }

    fn set_balance(
        &mut self,
        module: ModuleId,
        owner: OwnerId,
        balance: CipherHandle,
        now: DateTime<Utc>,
    ) {
        self.positions.entry(module).or_default().insert(
            owner,
            Position {
                owner,
                module,
                balance,
                updated_at: now,
            },
        );
    }

    /// All balance handles of a module (for conservation audits).
    pub fn balances(&self, module: ModuleId) -> impl Iterator<Item = CipherHandle> + '_ {
        self.positions
            .get(&module)
            .into_iter()
            .flat_map(|owners| owners.values().map(|p| p.balance))
    }

    /// Number of open positions in a module.
    #[must_use]
    pub fn position_count(&self, module: ModuleId) -> usize {
        self.positions.get(&module).map_or(0, BTreeMap::len)
    }
}
