//! # veilround-types
//!
//! Shared types, errors, configuration and capability traits for the
//! **VeilRound** confidential batching engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OwnerId`], [`ModuleId`], [`RoundId`], [`CipherHandle`], [`SettlementKey`]
//! - **Round model**: [`Round`], [`RoundState`], [`PendingDecryption`], [`FailureRecord`]
//! - **Intent model**: [`Intent`], [`Direction`], [`EncryptedInput`], [`InputContext`]
//! - **Position model**: [`Position`], [`LedgerAccount`], [`InboundTransfer`]
//! - **Settlement model**: [`SettlementResult`], [`VenueReceipt`], [`VenueAction`], [`Allocation`]
//! - **Signed encoding**: [`SignedEncoding`] (offset-bias over 128-bit plaintexts)
//! - **Capabilities**: [`FheBackend`], [`DecryptionOracle`], [`CapitalVenue`], [`ConfidentialLedger`]
//! - **Configuration**: [`EngineConfig`], [`ModuleConfig`], [`ModuleKind`], [`RoundConfig`], [`GatewayConfig`]
//! - **Errors**: [`VeilError`] with `VR_ERR_` prefix codes and an [`ErrorClass`] taxonomy
//! - **Constants**: system-wide limits and defaults
//!
//! With the `test-helpers` feature, [`sim`] provides in-memory collaborators.

pub mod capability;
pub mod config;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod ids;
pub mod intent;
pub mod position;
pub mod round;
pub mod settlement;

#[cfg(any(test, feature = "test-helpers"))]
pub mod sim;

// Re-export all primary types at crate root for ergonomic imports:
//   use veilround_types::{Round, RoundState, Intent, VeilError, ...};

pub use capability::*;
pub use config::*;
pub use encoding::*;
pub use error::*;
pub use ids::*;
pub use intent::*;
pub use position::*;
pub use round::*;
pub use settlement::*;

// Constants are accessed via `veilround_types::constants::FOO`
// (not re-exported to avoid name collisions).
