//! Position conservation audit.
//!
//! Invariant checked per module, in encrypted form:
//!
//! ```text
//! lending: actual = Σ positions + Σ escrowed debits − Σ credits   (unsettled rounds)
//! swap:    actual = Σ payouts allocated by settled rounds
//! expected = Σ position_delta of settled rounds
//! 0 <= expected - actual <= Σ dust allowance
//! ```
//!
//! Lending credits reach positions on submission, before their round adds
//! to `expected`, so they are passed in as `in_flight` and added back.
//!
//! `actual` is only available as ciphertexts, so the audit is two-phase:
//! [`ConservationLedger::prepare`] computes the encrypted difference, the
//! gateway decrypts it, and [`ConservationLedger::verify`] checks the clear
//! value. A difference above the allowance (including a wrapped negative
//! one, meaning positions were inflated) is a conservation violation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use veilround_types::{CipherHandle, FheBackend, ModuleId, Result, VeilError};

use crate::gateway::VerifiedDecryption;

/// An encrypted difference waiting for decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAudit {
    pub module: ModuleId,
    pub handle: CipherHandle,
    pub expected: u128,
    pub dust_allowance: u128,
    pub prepared_at: DateTime<Utc>,
}

/// Outcome of a passed audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub module: ModuleId,
    pub expected: u128,
    /// `expected - actual`: units kept by the module as rounding dust.
    pub drift: u128,
    pub dust_allowance: u128,
    pub settled_rounds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ModuleSupply {
    expected: i128,
    dust_allowance: u128,
    settled_rounds: u64,
    pending: Option<PendingAudit>,
}

/// Per-module expected supply and audit state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConservationLedger {
    modules: BTreeMap<ModuleId, ModuleSupply>,
}

impl ConservationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a settled round into the expected supply.
    pub fn record_settlement(&mut self, module: ModuleId, position_delta: i128, dust: u128) {
        let supply = self.modules.entry(module).or_default();
        supply.expected += position_delta;
        supply.dust_allowance += dust;
        supply.settled_rounds += 1;
    }

    /// Expected position supply of a module.
    #[must_use]
    pub fn expected(&self, module: ModuleId) -> i128 {
        self.modules.get(&module).map_or(0, |s| s.expected)
    }

    #[must_use]
    pub fn dust_allowance(&self, module: ModuleId) -> u128 {
        self.modules.get(&module).map_or(0, |s| s.dust_allowance)
    }

    #[must_use]
    pub fn pending(&self, module: ModuleId) -> Option<&PendingAudit> {
        self.modules.get(&module)?.pending.as_ref()
    }

    /// Compute `expected + Σ in_flight - Σ actual` homomorphically and park
    /// it for decryption.
    ///
    /// Replaces any earlier pending audit of the module.
    ///
    /// # Errors
    /// - `InvariantViolation` if the expected supply went negative
    /// - any backend error
    pub fn prepare<F, I, J>(
        &mut self,
        fhe: &mut F,
        module: ModuleId,
        in_flight: I,
        actual: J,
        now: DateTime<Utc>,
    ) -> Result<PendingAudit>
    where
        F: FheBackend,
        I: IntoIterator<Item = CipherHandle>,
        J: IntoIterator<Item = CipherHandle>,
    {
        let supply = self.modules.entry(module).or_default();
        let expected =
            u128::try_from(supply.expected).map_err(|_| VeilError::InvariantViolation {
                reason: format!("{module} expected supply is negative: {}", supply.expected),
            })?;

        let mut diff = fhe.trivial(expected)?;
        let mut terms = 0usize;
        for handle in in_flight {
            diff = fhe.add(diff, handle)?;
            terms += 1;
        }
        for handle in actual {
            diff = fhe.sub(diff, handle)?;
            terms += 1;
        }

        let audit = PendingAudit {
            module,
            handle: diff,
            expected,
            dust_allowance: supply.dust_allowance,
            prepared_at: now,
        };
        supply.pending = Some(audit.clone());
        info!(%module, expected, terms, handle = %diff.short(), "conservation audit prepared");
        Ok(audit)
    }

    /// Check the decrypted difference of the pending audit.
    ///
    /// The pending audit is consumed whether or not it passes.
    ///
    /// # Errors
    /// - `NoPendingAudit` if nothing was prepared
    /// - `HandleMismatch` if the decryption is for another handle
    /// - `ConservationViolation` if the drift exceeds the dust allowance
    pub fn verify(&mut self, module: ModuleId, decrypted: &VerifiedDecryption) -> Result<AuditReport> {
        let supply = self
            .modules
            .get_mut(&module)
            .ok_or(VeilError::NoPendingAudit { module })?;
        let audit = supply
            .pending
            .as_ref()
            .ok_or(VeilError::NoPendingAudit { module })?;
        if audit.handle != decrypted.handle {
            return Err(VeilError::HandleMismatch {
                expected: audit.handle,
                actual: decrypted.handle,
            });
        }
        let audit = supply
            .pending
            .take()
            .ok_or(VeilError::NoPendingAudit { module })?;

        let drift = decrypted.clear;
        if drift > audit.dust_allowance {
            let reason = if drift > audit.expected {
                format!(
                    "positions exceed expected supply {} (wrapped difference {drift})",
                    audit.expected
                )
            } else {
                format!(
                    "drift {drift} exceeds dust allowance {} (expected {})",
                    audit.dust_allowance, audit.expected
                )
            };
            error!(%module, expected = audit.expected, drift, allowance = audit.dust_allowance, "CONSERVATION VIOLATION");
            return Err(VeilError::ConservationViolation { module, reason });
        }

        info!(%module, expected = audit.expected, drift, "conservation audit passed");
        Ok(AuditReport {
            module,
            expected: audit.expected,
            drift,
            dust_allowance: audit.dust_allowance,
            settled_rounds: supply.settled_rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use veilround_types::sim::SimFhe;

    use super::*;

    const M: ModuleId = ModuleId(1);

    fn decrypt(fhe: &SimFhe, handle: CipherHandle) -> VerifiedDecryption {
        let resp = fhe.decrypt_now(handle).unwrap();
        VerifiedDecryption {
            handle,
            clear: resp.clear,
            proof: resp.proof,
        }
    }

    fn audit(ledger: &mut ConservationLedger, fhe: &mut SimFhe, actual: &[u128]) -> Result<AuditReport> {
        audit_with(ledger, fhe, &[], actual)
    }

    fn audit_with(
        ledger: &mut ConservationLedger,
        fhe: &mut SimFhe,
        in_flight: &[u128],
        actual: &[u128],
    ) -> Result<AuditReport> {
        let in_flight: Vec<CipherHandle> = in_flight.iter().map(|v| fhe.store(*v)).collect();
        let handles: Vec<CipherHandle> = actual.iter().map(|v| fhe.store(*v)).collect();
        let pending = ledger.prepare(fhe, M, in_flight, handles, Utc::now()).unwrap();
        let decrypted = decrypt(fhe, pending.handle);
        ledger.verify(M, &decrypted)
    }

    #[test]
    fn empty_module_balances() {
        let mut fhe = SimFhe::new(1);
        let mut ledger = ConservationLedger::new();
        let report = audit(&mut ledger, &mut fhe, &[]).unwrap();
        assert_eq!(report.drift, 0);
    }

    #[test]
    fn settlements_accumulate_expected() {
        let mut ledger = ConservationLedger::new();
        ledger.record_settlement(M, 150, 0);
        ledger.record_settlement(M, -40, 2);
        assert_eq!(ledger.expected(M), 110);
        assert_eq!(ledger.dust_allowance(M), 2);
    }

    #[test]
    fn exact_supply_passes() {
        let mut fhe = SimFhe::new(2);
        let mut ledger = ConservationLedger::new();
        ledger.record_settlement(M, 150, 0);
        let report = audit(&mut ledger, &mut fhe, &[100, 50]).unwrap();
        assert_eq!(report.expected, 150);
        assert_eq!(report.settled_rounds, 1);
        assert!(ledger.pending(M).is_none());
    }

    #[test]
    fn in_flight_credits_offset_optimistic_positions() {
        let mut fhe = SimFhe::new(9);
        let mut ledger = ConservationLedger::new();
        ledger.record_settlement(M, 150, 0);
        // Two settled positions plus a fresh 40-unit deposit not yet settled.
        let report = audit_with(&mut ledger, &mut fhe, &[40], &[100, 90]).unwrap();
        assert_eq!(report.drift, 0);
        let err = audit_with(&mut ledger, &mut fhe, &[], &[100, 90]).unwrap_err();
        assert!(matches!(err, VeilError::ConservationViolation { .. }));
    }

    #[test]
    fn dust_within_allowance_passes() {
        let mut fhe = SimFhe::new(3);
        let mut ledger = ConservationLedger::new();
        ledger.record_settlement(M, 100, 3);
        let report = audit(&mut ledger, &mut fhe, &[33, 33, 33]).unwrap();
        assert_eq!(report.drift, 1);
    }

    #[test]
    fn inflated_positions_violate() {
        let mut fhe = SimFhe::new(4);
        let mut ledger = ConservationLedger::new();
        ledger.record_settlement(M, 100, 3);
        let err = audit(&mut ledger, &mut fhe, &[60, 41]).unwrap_err();
        assert!(matches!(err, VeilError::ConservationViolation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_supply_violates() {
        let mut fhe = SimFhe::new(5);
        let mut ledger = ConservationLedger::new();
        ledger.record_settlement(M, 100, 0);
        let err = audit(&mut ledger, &mut fhe, &[90]).unwrap_err();
        assert!(format!("{err}").contains("dust allowance"));
    }

    #[test]
    fn verify_without_prepare() {
        let fhe = SimFhe::new(6);
        let mut ledger = ConservationLedger::new();
        let d = decrypt(&fhe, fhe.store(0));
        let err = ledger.verify(M, &d).unwrap_err();
        assert!(matches!(err, VeilError::NoPendingAudit { .. }));
    }

    #[test]
    fn verify_rejects_other_handle() {
        let mut fhe = SimFhe::new(7);
        let mut ledger = ConservationLedger::new();
        ledger
            .prepare(&mut fhe, M, Vec::new(), Vec::new(), Utc::now())
            .unwrap();
        let d = decrypt(&fhe, fhe.store(0));
        let err = ledger.verify(M, &d).unwrap_err();
        assert!(matches!(err, VeilError::HandleMismatch { .. }));
        assert!(ledger.pending(M).is_some());
    }

    #[test]
    fn ledger_serde_roundtrip() {
        let mut fhe = SimFhe::new(8);
        let mut ledger = ConservationLedger::new();
        ledger.record_settlement(M, 12, 1);
        ledger
            .prepare(&mut fhe, M, Vec::new(), Vec::new(), Utc::now())
            .unwrap();
        let json = serde_json::to_string(&ledger).unwrap();
        let back: ConservationLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(ledger, back);
    }
}
