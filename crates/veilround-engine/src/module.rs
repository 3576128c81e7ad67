//! Per-module state: one round machine shared by lending and swap modules.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veilround_distribution::ClaimBook;
use veilround_ingress::{IntentAggregator, RoundCoordinator};
use veilround_types::{FheBackend, ModuleConfig, Result, RoundId, SettlementResult};

/// Everything the engine keeps for one registered module.
///
/// Positions, the settlement guard and the conservation ledger live on the
/// engine itself because they are audited across modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleState {
    pub(crate) config: ModuleConfig,
    pub(crate) coordinator: RoundCoordinator,
    pub(crate) aggregator: IntentAggregator,
    pub(crate) claims: ClaimBook,
    pub(crate) settlements: BTreeMap<RoundId, SettlementResult>,
}

impl ModuleState {
    pub(crate) fn open<F: FheBackend>(
        fhe: &mut F,
        config: ModuleConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        config.validate()?;
        let coordinator = RoundCoordinator::open(fhe, config.id, config.round.clone(), now)?;
        Ok(Self {
            config,
            coordinator,
            aggregator: IntentAggregator::new(),
            claims: ClaimBook::new(),
            settlements: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    #[must_use]
    pub fn coordinator(&self) -> &RoundCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn aggregator(&self) -> &IntentAggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimBook {
        &self.claims
    }

    /// Max intents per round, as a `usize` cap for the aggregator.
    pub(crate) fn max_intents(&self) -> usize {
        self.config.round.max_intents_per_round
    }
}
