//! Encrypted per-module positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssetId, CipherHandle, ModuleId, OwnerId};

/// A participant's encrypted supply shares inside a lending module.
///
/// Shares are par with principal. Swap modules keep no positions: their
/// output is paid straight to the owner's wallet on claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub owner: OwnerId,
    pub module: ModuleId,
    pub balance: CipherHandle,
    pub updated_at: DateTime<Utc>,
}

/// An account on the external confidential-token ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum LedgerAccount {
    /// A participant's wallet.
    Owner(OwnerId),
    /// The module's own custody account.
    Module(ModuleId),
}

/// Receipt of a confidential transfer into a module's custody.
///
/// Issued by [`ConfidentialLedger::transfer_in`](crate::ConfidentialLedger::transfer_in)
/// and redeemable once through
/// [`ConfidentialLedger::acknowledge`](crate::ConfidentialLedger::acknowledge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTransfer {
    pub asset: AssetId,
    pub from: OwnerId,
    pub to: ModuleId,
    /// Amount actually moved (an encrypted zero when the owner was short).
    pub moved: CipherHandle,
}
