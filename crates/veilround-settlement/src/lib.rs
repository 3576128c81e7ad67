//! # veilround-settlement
//!
//! **Finality Plane**: verified decryption, exactly-once venue execution
//! and conservation audits.
//!
//! ## Architecture
//!
//! The Finality Plane receives a frozen round from the intake plane and:
//! 1. Verifies the gateway's decryption of the round aggregate
//! 2. Claims the round in the [`SettlementGuard`] (no double-settlement)
//! 3. Executes the clear net against the capital venue, once
//! 4. Folds the settled position delta into the [`ConservationLedger`]
//!
//! ## Decryption Flow
//!
//! ```text
//! frozen aggregate → GatewayClient.request() → oracle
//!                  → GatewayClient.verify(handle, clear, proof) → VerifiedDecryption
//!                  → SettlementExecutor.execute(net) → VenueReceipt
//! ```
//!
//! Conservation audits reuse the same gateway: the encrypted difference
//! between expected and actual supply is decrypted and checked against the
//! accumulated rounding allowance.

pub mod conservation;
pub mod executor;
pub mod gateway;
pub mod guard;

pub use conservation::{AuditReport, ConservationLedger, PendingAudit};
pub use executor::SettlementExecutor;
pub use gateway::{GatewayClient, VerifiedDecryption};
pub use guard::{GuardState, SettlementGuard};
