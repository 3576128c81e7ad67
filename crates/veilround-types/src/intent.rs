//! Intent model: a participant's encrypted instruction for one round.
//!
//! The direction of an intent is public (supply and withdraw are different
//! entry points); only its amount is encrypted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CipherHandle, ModuleId, OwnerId, RoundId};

/// Sign of an intent's contribution to the round aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Direction {
    /// Adds to the aggregate: lending supply, swap sell-A.
    Credit,
    /// Subtracts from the aggregate: lending withdraw.
    Debit,
}

impl Direction {
    /// The direction with the opposite sign.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Credit => Self::Debit,
            Self::Debit => Self::Credit,
        }
    }

    /// Direction matching the sign of a clear net value. `None` for zero.
    #[must_use]
    pub fn of_net(net: i128) -> Option<Self> {
        match net.signum() {
            1 => Some(Self::Credit),
            -1 => Some(Self::Debit),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credit => write!(f, "CREDIT"),
            Self::Debit => write!(f, "DEBIT"),
        }
    }
}

/// Who an encrypted input was produced for.
///
/// Input proofs bind a ciphertext to exactly one (owner, module) pair, so a
/// ciphertext lifted from one user's transaction cannot be replayed by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputContext {
    pub owner: OwnerId,
    pub module: ModuleId,
}

/// A freshly encrypted value as submitted by a client: handle plus input proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handle: CipherHandle,
    pub proof: Vec<u8>,
}

/// One intent folded into a round, retained for distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Who submitted it.
    pub owner: OwnerId,
    /// Round it was folded into.
    pub round: RoundId,
    /// Public sign.
    pub direction: Direction,
    /// Effective amount (after clamping debits to the position balance).
    pub amount: CipherHandle,
    /// Biased contribution that was added to the aggregate.
    pub contribution: CipherHandle,
    /// Arrival order inside the round.
    pub sequence: u64,
    pub submitted_at: DateTime<Utc>,
}
