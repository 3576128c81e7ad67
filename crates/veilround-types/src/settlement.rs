//! Settlement records: venue receipts, results and per-owner allocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssetId, CipherHandle, ModuleId, OwnerId, RoundId, SettlementKey};

/// What the executor did against the capital venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueAction {
    /// Net supply into the lending venue.
    Supply { asset: AssetId, amount: u128 },
    /// Net withdraw from the lending venue.
    Withdraw {
        asset: AssetId,
        requested: u128,
        received: u128,
    },
    /// Disposal of asset A for asset B on the exchange.
    Swap {
        asset_in: AssetId,
        amount_in: u128,
        asset_out: AssetId,
        amount_out: u128,
    },
    /// Net was zero; the venue was not called.
    NoOp,
}

/// Receipt of the single venue interaction of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueReceipt {
    pub key: SettlementKey,
    pub action: VenueAction,
    pub executed_at: DateTime<Utc>,
}

impl VenueReceipt {
    /// Units the round received back from the venue.
    ///
    /// A supply is credited at par, so its proceeds equal the amount supplied.
    #[must_use]
    pub fn proceeds(&self) -> u128 {
        match &self.action {
            VenueAction::Supply { amount, .. } => *amount,
            VenueAction::Withdraw { received, .. } => *received,
            VenueAction::Swap { amount_out, .. } => *amount_out,
            VenueAction::NoOp => 0,
        }
    }

    /// Whether the venue was actually called.
    #[must_use]
    pub fn touched_venue(&self) -> bool {
        !matches!(self.action, VenueAction::NoOp)
    }
}

/// Immutable outcome of one settled round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub module: ModuleId,
    pub round: RoundId,
    /// Decrypted signed net of the round.
    pub clear_net: i128,
    /// `|clear_net|`: what was sent to the venue (totalRequestedAmount).
    pub requested: u128,
    /// What the venue returned (totalReceivedAmount).
    pub received: u128,
    /// Part of `received` distributed to aligned intents.
    pub distributable: u128,
    /// Venue surplus kept by the module.
    pub reserve: u128,
    /// Change in what the module owes its owners (conservation delta):
    /// the net for lending positions, the distributed output for a swap.
    pub position_delta: i128,
    /// Floor-division rounding the module may keep from this round.
    pub dust_allowance: u128,
    pub receipt: VenueReceipt,
    /// SHA-256 commitment to the round's allocations.
    pub distribution_root: [u8; 32],
    pub settled_at: DateTime<Utc>,
}

/// One owner's share of a settled round, claimable exactly once.
///
/// Lending supply was credited to the position on submission, so a pure
/// supplier's allocation carries no payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub owner: OwnerId,
    pub round: RoundId,
    /// Sent to the owner's wallet in the module's output asset on claim:
    /// lending withdrawals and swap proceeds.
    pub payout: Option<CipherHandle>,
}
