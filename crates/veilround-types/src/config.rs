//! Configuration types for VeilRound engines and modules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AssetId, ModuleId, Result, VeilError, constants};

/// Quorum and timing rules of a module's rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Distinct owners required before a round may leave Collecting.
    pub min_distinct_users: usize,
    /// Minimum time a round stays in Collecting.
    pub min_time_between_rounds: Duration,
    /// Cap on intents folded into one round.
    pub max_intents_per_round: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            min_distinct_users: constants::DEFAULT_MIN_DISTINCT_USERS,
            min_time_between_rounds: Duration::from_secs(
                constants::DEFAULT_MIN_TIME_BETWEEN_ROUNDS_SECS,
            ),
            max_intents_per_round: constants::DEFAULT_MAX_INTENTS_PER_ROUND,
        }
    }
}

impl RoundConfig {
    /// Instant rounds with the given quorum (handy for tests and demos).
    #[must_use]
    pub fn immediate(min_distinct_users: usize) -> Self {
        Self {
            min_distinct_users,
            min_time_between_rounds: Duration::ZERO,
            ..Self::default()
        }
    }

    /// # Errors
    /// `Configuration` if the quorum is zero or the intent cap is outside
    /// the range the signed encoding supports.
    pub fn validate(&self) -> Result<()> {
        if self.min_distinct_users == 0 {
            return Err(VeilError::Configuration(
                "min_distinct_users must be at least 1".into(),
            ));
        }
        let cap = u64::try_from(self.max_intents_per_round).unwrap_or(u64::MAX);
        if cap == 0 || cap > constants::MAX_ENCODED_TERMS {
            return Err(VeilError::Configuration(format!(
                "max_intents_per_round must be in 1..={}",
                constants::MAX_ENCODED_TERMS
            )));
        }
        Ok(())
    }
}

/// Which capital venue a module wraps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleKind {
    /// Private lending wrapper: net supply or net withdraw of `asset`.
    Lending { asset: AssetId },
    /// Private swap wrapper: one-directional disposal of `asset_in` for `asset_out`.
    Swap { asset_in: AssetId, asset_out: AssetId },
}

impl ModuleKind {
    /// Asset users deposit into the module (the confidential token they send).
    #[must_use]
    pub fn input_asset(&self) -> &str {
        match self {
            Self::Lending { asset } => asset,
            Self::Swap { asset_in, .. } => asset_in,
        }
    }

    /// Asset paid to owners on claim: withdrawals or swap output.
    #[must_use]
    pub fn output_asset(&self) -> &str {
        match self {
            Self::Lending { asset } => asset,
            Self::Swap { asset_out, .. } => asset_out,
        }
    }

    #[must_use]
    pub fn accepts_debits(&self) -> bool {
        matches!(self, Self::Lending { .. })
    }

    /// Whether credit intents open encrypted positions as they are submitted.
    ///
    /// Only lending modules hold positions. Swap output goes straight to the
    /// owner's wallet when claimed.
    #[must_use]
    pub fn keeps_positions(&self) -> bool {
        matches!(self, Self::Lending { .. })
    }
}

/// One protocol module served by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: ModuleId,
    /// Human-readable name for logs (e.g., "lending-usdc").
    pub name: String,
    pub kind: ModuleKind,
    #[serde(default)]
    pub round: RoundConfig,
}

impl ModuleConfig {
    /// Create a lending module with default round rules.
    #[must_use]
    pub fn lending(id: ModuleId, asset: &str) -> Self {
        Self {
            id,
            name: format!("lending-{}", asset.to_lowercase()),
            kind: ModuleKind::Lending {
                asset: asset.to_string(),
            },
            round: RoundConfig::default(),
        }
    }

    /// Create a swap module with default round rules.
    #[must_use]
    pub fn swap(id: ModuleId, asset_in: &str, asset_out: &str) -> Self {
        Self {
            id,
            name: format!(
                "swap-{}-{}",
                asset_in.to_lowercase(),
                asset_out.to_lowercase()
            ),
            kind: ModuleKind::Swap {
                asset_in: asset_in.to_string(),
                asset_out: asset_out.to_string(),
            },
            round: RoundConfig::default(),
        }
    }

    /// Replace the round rules.
    #[must_use]
    pub fn with_round(mut self, round: RoundConfig) -> Self {
        self.round = round;
        self
    }

    /// # Errors
    /// `Configuration` on empty or duplicate asset names or bad round rules.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ModuleKind::Lending { asset } if asset.is_empty() => {
                return Err(VeilError::Configuration(format!(
                    "{}: lending asset must not be empty",
                    self.id
                )));
            }
            ModuleKind::Swap {
                asset_in,
                asset_out,
            } => {
                if asset_in.is_empty() || asset_out.is_empty() {
                    return Err(VeilError::Configuration(format!(
                        "{}: swap assets must not be empty",
                        self.id
                    )));
                }
                if asset_in == asset_out {
                    return Err(VeilError::Configuration(format!(
                        "{}: swap assets must differ",
                        self.id
                    )));
                }
            }
            ModuleKind::Lending { .. } => {}
        }
        self.round.validate()
    }
}

/// Bounded exponential backoff for decryption polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_DECRYPTION_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(constants::DEFAULT_DECRYPTION_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(constants::DEFAULT_DECRYPTION_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff before poll number `attempt` (0-based): doubles, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Decryption gateway trust configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Hex-encoded ed25519 public keys whose decryption proofs are accepted.
    pub trusted_signers: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl GatewayConfig {
    /// # Errors
    /// `Configuration` if no signer is trusted or a key is not 32 hex bytes.
    pub fn validate(&self) -> Result<()> {
        if self.trusted_signers.is_empty() {
            return Err(VeilError::Configuration(
                "gateway needs at least one trusted signer".into(),
            ));
        }
        for key in &self.trusted_signers {
            let ok = hex::decode(key).is_ok_and(|bytes| bytes.len() == 32);
            if !ok {
                return Err(VeilError::Configuration(format!(
                    "trusted signer is not a 32-byte hex key: {key}"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(VeilError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub modules: Vec<ModuleConfig>,
    pub gateway: GatewayConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON config document.
    ///
    /// # Errors
    /// `Serialization` on malformed JSON, `Configuration` on invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// `Configuration` on the first invalid module, a duplicate module id,
    /// or an invalid gateway section.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for module in &self.modules {
            if !seen.insert(module.id) {
                return Err(VeilError::Configuration(format!(
                    "duplicate module id {}",
                    module.id
                )));
            }
            module.validate()?;
        }
        self.gateway.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNER: &str = "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

    #[test]
    fn round_config_defaults() {
        let cfg = RoundConfig::default();
        assert_eq!(cfg.min_distinct_users, 2);
        assert_eq!(cfg.min_time_between_rounds.as_secs(), 120);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_quorum_rejected() {
        let cfg = RoundConfig::immediate(0);
        assert!(matches!(cfg.validate(), Err(VeilError::Configuration(_))));
    }

    #[test]
    fn intent_cap_beyond_encoding_rejected() {
        let cfg = RoundConfig {
            max_intents_per_round: 0,
            ..RoundConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn swap_assets_must_differ() {
        let cfg = ModuleConfig::swap(ModuleId(2), "cUSDC", "cUSDC");
        assert!(cfg.validate().is_err());
        assert!(ModuleConfig::swap(ModuleId(2), "cUSDC", "cUNI").validate().is_ok());
    }

    #[test]
    fn module_kind_assets() {
        let lending = ModuleConfig::lending(ModuleId(1), "cUSDC");
        assert_eq!(lending.name, "lending-cusdc");
        assert!(lending.kind.accepts_debits());
        assert_eq!(lending.kind.output_asset(), "cUSDC");

        let swap = ModuleConfig::swap(ModuleId(2), "cUSDC", "cUNI");
        assert!(!swap.kind.accepts_debits());
        assert_eq!(swap.kind.input_asset(), "cUSDC");
        assert_eq!(swap.kind.output_asset(), "cUNI");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0).as_millis(), 100);
        assert_eq!(policy.backoff(1).as_millis(), 200);
        assert_eq!(policy.backoff(2).as_millis(), 400);
        assert_eq!(policy.backoff(3).as_millis(), 500);
        assert_eq!(policy.backoff(40).as_millis(), 500);
    }

    #[test]
    fn gateway_requires_valid_signer() {
        assert!(GatewayConfig::default().validate().is_err());
        let bad = GatewayConfig {
            trusted_signers: vec!["abcd".into()],
            retry: RetryPolicy::default(),
        };
        assert!(bad.validate().is_err());
        let good = GatewayConfig {
            trusted_signers: vec![SIGNER.into()],
            retry: RetryPolicy::default(),
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn engine_config_from_json() {
        let json = format!(
            r#"{{
                "modules": [
                    {{ "id": 1, "name": "lending-usdc",
                       "kind": {{ "type": "lending", "asset": "cUSDC" }} }},
                    {{ "id": 2, "name": "swap-usdc-uni",
                       "kind": {{ "type": "swap", "asset_in": "cUSDC", "asset_out": "cUNI" }},
                       "round": {{ "min_distinct_users": 3,
                                   "min_time_between_rounds": {{ "secs": 60, "nanos": 0 }},
                                   "max_intents_per_round": 1000 }} }}
                ],
                "gateway": {{ "trusted_signers": ["{SIGNER}"] }}
            }}"#
        );
        let cfg = EngineConfig::from_json_str(&json).unwrap();
        assert_eq!(cfg.modules.len(), 2);
        assert_eq!(cfg.modules[0].round, RoundConfig::default());
        assert_eq!(cfg.modules[1].round.min_distinct_users, 3);
        assert_eq!(cfg.gateway.retry, RetryPolicy::default());
    }

    #[test]
    fn engine_config_rejects_duplicate_modules() {
        let cfg = EngineConfig {
            modules: vec![
                ModuleConfig::lending(ModuleId(1), "cUSDC"),
                ModuleConfig::lending(ModuleId(1), "cDAI"),
            ],
            gateway: GatewayConfig {
                trusted_signers: vec![SIGNER.into()],
                retry: RetryPolicy::default(),
            },
        };
        assert!(matches!(cfg.validate(), Err(VeilError::Configuration(_))));
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, VeilError::Serialization(_)));
    }
}
