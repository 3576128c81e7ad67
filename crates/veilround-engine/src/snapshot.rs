//! JSON snapshot and restore of the complete engine state.
//!
//! Collaborators (backend, oracle, venue, ledger) are live handles and are
//! supplied again on restore. A decryption requested before the snapshot is
//! still recorded on its round and can simply be requested again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use veilround_ingress::PositionLedger;
use veilround_settlement::{ConservationLedger, GatewayClient, SettlementGuard};
use veilround_types::{
    CapitalVenue, ConfidentialLedger, DecryptionOracle, FheBackend, GatewayConfig, ModuleId,
    Result, RoundState, constants,
};

use crate::RoundEngine;
use crate::module::ModuleState;

/// Serializable engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub version: String,
    pub gateway: GatewayConfig,
    pub modules: BTreeMap<ModuleId, ModuleState>,
    pub positions: PositionLedger,
    pub conservation: ConservationLedger,
    pub guard: SettlementGuard,
}

impl<F, O, V, L> RoundEngine<F, O, V, L>
where
    F: FheBackend,
    O: DecryptionOracle,
    V: CapitalVenue,
    L: ConfidentialLedger,
{
    /// A copy of the current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState {
            version: constants::VERSION.to_string(),
            gateway: self.gateway_config.clone(),
            modules: self.modules.clone(),
            positions: self.positions.clone(),
            conservation: self.conservation.clone(),
            guard: self.guard.clone(),
        }
    }

    /// Serialize the complete state to JSON.
    pub fn snapshot(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.state())?)
    }

    /// Rebuild an engine from [`RoundEngine::snapshot`] output.
    ///
    /// # Errors
    /// `Serialization` on malformed JSON, `Configuration` on a bad gateway config.
    pub fn restore(json: &str, fhe: F, oracle: O, venue: V, ledger: L) -> Result<Self> {
        let state: EngineState = serde_json::from_str(json)?;
        if state.version != constants::VERSION {
            warn!(
                snapshot = %state.version,
                running = constants::VERSION,
                "restoring snapshot from another version"
            );
        }
        let gateway = GatewayClient::new(oracle, &state.gateway)?;

        for (id, module) in &state.modules {
            for round in module.coordinator.rounds() {
                match round.state {
                    RoundState::Executing => warn!(
                        module = %id,
                        round = %round.index,
                        "round was executing at snapshot; recover_executing required"
                    ),
                    RoundState::QuorumMet if round.decryption.is_some() => info!(
                        module = %id,
                        round = %round.index,
                        "pending decryption restored; re-request to resume"
                    ),
                    _ => {}
                }
            }
        }
        info!(modules = state.modules.len(), "engine restored from snapshot");

        Ok(Self {
            fhe,
            gateway,
            gateway_config: state.gateway,
            venue,
            ledger,
            modules: state.modules,
            positions: state.positions,
            conservation: state.conservation,
            guard: state.guard,
        })
    }
}
