//! Error types for the VeilRound batching engine.
//!
//! All errors use the `VR_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by class:
//! - 1xx: Validation errors (malformed proof/handle, bad amount, bad input)
//! - 2xx: State errors (round not ready, already pending, already settled, ...)
//! - 3xx: External errors (capital venue, decryption gateway, confidential ledger)
//! - 4xx: Consistency errors (conservation or encoding invariant broken, fatal)
//! - 9xx: General / internal errors

use std::fmt;

use thiserror::Error;

use crate::{CipherHandle, Direction, ModuleId, OwnerId, RoundId, RoundState};

/// The recovery class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Fix the input and resubmit. Never auto-retried.
    Validation,
    /// Wait for the precondition. Never auto-retried.
    State,
    /// A collaborator failed. Decryption is retryable, venue calls are not.
    External,
    /// Must never happen under correct operation.
    Consistency,
    /// Configuration, serialization, I/O.
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "VALIDATION"),
            Self::State => write!(f, "STATE"),
            Self::External => write!(f, "EXTERNAL"),
            Self::Consistency => write!(f, "CONSISTENCY"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Central error enum for all VeilRound operations.
#[derive(Debug, Error)]
pub enum VeilError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The encrypted input's proof does not bind it to this owner/module.
    #[error("VR_ERR_100: Invalid input proof: {reason}")]
    InvalidInputProof { reason: String },

    /// The backend does not know this ciphertext handle.
    #[error("VR_ERR_101: Malformed or unknown handle: {0}")]
    MalformedHandle(CipherHandle),

    /// A clear amount that must be strictly positive was zero.
    #[error("VR_ERR_102: Non-positive amount: {context}")]
    NonPositiveAmount { context: String },

    /// The module does not accept intents in this direction.
    #[error("VR_ERR_103: {module} does not accept {direction} intents")]
    UnsupportedDirection {
        module: ModuleId,
        direction: Direction,
    },

    /// A clear amount exceeds the representable intent range.
    #[error("VR_ERR_104: Amount out of range: {amount}")]
    AmountOutOfRange { amount: u128 },

    /// No module is registered under this id.
    #[error("VR_ERR_105: Unknown module: {0}")]
    UnknownModule(ModuleId),

    /// The module has no record of this round.
    #[error("VR_ERR_106: Unknown {round} in {module}")]
    UnknownRound { module: ModuleId, round: RoundId },

    /// The decryption proof failed signature verification.
    #[error("VR_ERR_107: Decryption proof invalid: {reason}")]
    ProofInvalid { reason: String },

    /// The decryption proof is bound to a different ciphertext handle.
    #[error("VR_ERR_108: Handle mismatch: expected {expected}, got {actual}")]
    HandleMismatch {
        expected: CipherHandle,
        actual: CipherHandle,
    },

    /// A module with this id is already registered.
    #[error("VR_ERR_109: Module already registered: {0}")]
    DuplicateModule(ModuleId),

    /// A transfer callback the ledger never issued, or one already consumed.
    #[error("VR_ERR_110: Unverified inbound transfer: {reason}")]
    UnverifiedTransfer { reason: String },

    // =================================================================
    // State Errors (2xx)
    // =================================================================
    /// Quorum or minimum collecting time not yet reached.
    #[error(
        "VR_ERR_200: {round} not ready: {participants}/{required_participants} distinct users, \
         {elapsed_secs}s/{required_secs}s elapsed"
    )]
    RoundNotReady {
        round: RoundId,
        participants: usize,
        required_participants: usize,
        elapsed_secs: u64,
        required_secs: u64,
    },

    /// A round already left Collecting and has not been settled yet.
    #[error("VR_ERR_201: {pending} is awaiting settlement")]
    RoundAlreadyPending { pending: RoundId },

    /// The round was already settled; no further venue call is made.
    #[error("VR_ERR_202: {round} already settled")]
    AlreadySettled { round: RoundId },

    /// This owner already claimed their allocation for the round.
    #[error("VR_ERR_203: {owner} already claimed {round}")]
    ClaimedTwice { round: RoundId, owner: OwnerId },

    /// This owner has no recorded intent in the round.
    #[error("VR_ERR_204: {owner} has no position in {round}")]
    NoPositionInRound { round: RoundId, owner: OwnerId },

    /// The round aggregate is frozen; no more intents can be folded in.
    #[error("VR_ERR_205: {round} is frozen")]
    RoundFrozen { round: RoundId },

    /// The round reached its intent cap.
    #[error("VR_ERR_206: {round} is full")]
    RoundFull { round: RoundId },

    /// An operation was attempted in the wrong round state.
    #[error("VR_ERR_207: {round} in wrong state: expected {expected}, got {actual}")]
    WrongRoundState {
        round: RoundId,
        expected: RoundState,
        actual: RoundState,
    },

    /// The round was left mid-execution; operator recovery required.
    #[error("VR_ERR_208: {round} settlement in progress; recover before retrying")]
    SettlementInProgress { round: RoundId },

    /// No round is awaiting settlement.
    #[error("VR_ERR_209: No round awaiting settlement in {module}")]
    NoPendingRound { module: ModuleId },

    /// A conservation audit result arrived without a prepared audit.
    #[error("VR_ERR_210: No conservation audit pending in {module}")]
    NoPendingAudit { module: ModuleId },

    // =================================================================
    // External Errors (3xx)
    // =================================================================
    /// The capital venue rejected or failed the call.
    #[error("VR_ERR_300: Venue failure: {reason}")]
    VenueFailure { reason: String },

    /// The gateway has not produced a decryption yet (poll again).
    #[error("VR_ERR_301: Decryption not available for {handle}")]
    DecryptionUnavailable { handle: CipherHandle },

    /// The decryption gateway failed.
    #[error("VR_ERR_302: Gateway failure: {reason}")]
    GatewayFailure { reason: String },

    /// The confidential token ledger failed.
    #[error("VR_ERR_303: Confidential ledger failure: {reason}")]
    LedgerFailure { reason: String },

    // =================================================================
    // Consistency Errors (4xx)
    // =================================================================
    /// Σ positions no longer matches Σ settled aggregates; critical alert.
    #[error("VR_ERR_400: Conservation violation in {module}: {reason}")]
    ConservationViolation { module: ModuleId, reason: String },

    /// A decoded aggregate fell outside the representable signed range.
    #[error("VR_ERR_401: Encoding overflow: {reason}")]
    EncodingOverflow { reason: String },

    /// Any other broken internal invariant.
    #[error("VR_ERR_402: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("VR_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("VR_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("VR_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("VR_ERR_903: I/O error: {0}")]
    Io(String),
}

impl VeilError {
    /// Map this error onto its recovery class.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidInputProof { .. }
            | Self::MalformedHandle(_)
            | Self::NonPositiveAmount { .. }
            | Self::UnsupportedDirection { .. }
            | Self::AmountOutOfRange { .. }
            | Self::UnknownModule(_)
            | Self::UnknownRound { .. }
            | Self::ProofInvalid { .. }
            | Self::HandleMismatch { .. }
            | Self::DuplicateModule(_)
            | Self::UnverifiedTransfer { .. } => ErrorClass::Validation,

            Self::RoundNotReady { .. }
            | Self::RoundAlreadyPending { .. }
            | Self::AlreadySettled { .. }
            | Self::ClaimedTwice { .. }
            | Self::NoPositionInRound { .. }
            | Self::RoundFrozen { .. }
            | Self::RoundFull { .. }
            | Self::WrongRoundState { .. }
            | Self::SettlementInProgress { .. }
            | Self::NoPendingRound { .. }
            | Self::NoPendingAudit { .. } => ErrorClass::State,

            Self::VenueFailure { .. }
            | Self::DecryptionUnavailable { .. }
            | Self::GatewayFailure { .. }
            | Self::LedgerFailure { .. } => ErrorClass::External,

            Self::ConservationViolation { .. }
            | Self::EncodingOverflow { .. }
            | Self::InvariantViolation { .. } => ErrorClass::Consistency,

            Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) | Self::Io(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Whether the core may safely retry the failed step on its own.
    ///
    /// Only decryption requests qualify: decrypting the same handle is
    /// deterministic. Venue calls are surfaced to the caller instead.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DecryptionUnavailable { .. } | Self::GatewayFailure { .. }
        )
    }

    /// Whether this error signals an encoding or sequencing bug.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Consistency
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, VeilError>;

impl From<std::io::Error> for VeilError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VeilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = VeilError::AlreadySettled { round: RoundId(3) };
        let msg = format!("{err}");
        assert!(msg.starts_with("VR_ERR_202"), "Got: {msg}");
        assert!(msg.contains("round:3"));
    }

    #[test]
    fn round_not_ready_display() {
        let err = VeilError::RoundNotReady {
            round: RoundId(1),
            participants: 1,
            required_participants: 2,
            elapsed_secs: 30,
            required_secs: 120,
        };
        let msg = format!("{err}");
        assert!(msg.contains("VR_ERR_200"));
        assert!(msg.contains("1/2"));
        assert!(msg.contains("30s/120s"));
    }

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(
            VeilError::ProofInvalid { reason: "x".into() }.class(),
            ErrorClass::Validation
        );
        assert_eq!(
            VeilError::RoundAlreadyPending { pending: RoundId(0) }.class(),
            ErrorClass::State
        );
        assert_eq!(
            VeilError::VenueFailure { reason: "x".into() }.class(),
            ErrorClass::External
        );
        assert_eq!(
            VeilError::ConservationViolation {
                module: ModuleId(1),
                reason: "x".into()
            }
            .class(),
            ErrorClass::Consistency
        );
    }

    #[test]
    fn only_decryption_errors_are_retryable() {
        let handle = CipherHandle([1; 32]);
        assert!(VeilError::DecryptionUnavailable { handle }.is_retryable());
        assert!(VeilError::GatewayFailure { reason: "timeout".into() }.is_retryable());
        assert!(!VeilError::VenueFailure { reason: "revert".into() }.is_retryable());
        assert!(!VeilError::RoundNotReady {
            round: RoundId(0),
            participants: 0,
            required_participants: 2,
            elapsed_secs: 0,
            required_secs: 0,
        }
        .is_retryable());
    }

    #[test]
    fn consistency_errors_are_fatal() {
        assert!(VeilError::EncodingOverflow { reason: "x".into() }.is_fatal());
        assert!(!VeilError::Internal("x".into()).is_fatal());
    }

    #[test]
    fn all_errors_have_vr_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(VeilError::RoundFrozen { round: RoundId(2) }),
            Box::new(VeilError::UnknownModule(ModuleId(9))),
            Box::new(VeilError::LedgerFailure { reason: "x".into() }),
            Box::new(VeilError::Internal("test".into())),
            Box::new(VeilError::HandleMismatch {
                expected: CipherHandle([0; 32]),
                actual: CipherHandle([1; 32]),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("VR_ERR_"),
                "Error missing VR_ERR_ prefix: {msg}"
            );
        }
    }
}
