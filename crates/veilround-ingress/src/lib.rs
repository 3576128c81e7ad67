//! # veilround-ingress
//!
//! **Intake Plane**: encrypted positions, intent aggregation, round
//! coordination and round sealing.
//!
//! ## Architecture
//!
//! The intake plane sits between the outward engine surface and the
//! finality plane:
//! 1. **PositionLedger**: one encrypted balance per (module, owner)
//! 2. **IntentAggregator**: folds biased encrypted contributions into the
//!    Collecting round's aggregate and retains every intent
//! 3. **RoundCoordinator**: four-state round machine with the quorum/time gate
//! 4. **RoundSealer**: commits to a frozen round's intents (`intent_root`)
//!
//! ## Intent Flow
//!
//! ```text
//! submit → PositionLedger.plan_debit() (debits only) → IntentAggregator.fold()
//!        → RoundCoordinator.advance() → RoundSealer.intent_root() → frozen Round
//! ```
//!
//! A frozen round never accepts another intent; the next Collecting round
//! opens in the same step that freezes its predecessor.

pub mod intent_aggregator;
pub mod position_ledger;
pub mod round_coordinator;
pub mod round_sealer;

pub use intent_aggregator::{IntentAggregator, OwnerContribution};
pub use position_ledger::{PlannedDebit, PositionLedger};
pub use round_coordinator::RoundCoordinator;
pub use round_sealer::RoundSealer;
