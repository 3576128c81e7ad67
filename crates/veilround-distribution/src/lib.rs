//! # veilround-distribution
//!
//! **Pure distribution computation for VeilRound.**
//!
//! The compute plane takes a settled round's retained intents plus its
//! clear settlement numbers and produces encrypted per-owner allocations.
//! It has:
//!
//! - **No side effects**: no venue calls, no ledger transfers, no round state
//! - **Deterministic output**: same intents and numbers -> same allocations and root
//! - **Solvency by construction**: shares are floored, ratios only ever round down
//! - **Exactly-once claims**: the [`ClaimBook`] refuses a second claim

pub mod calculator;
pub mod claims;
pub mod determinism;
pub mod ratio;

pub use calculator::{Distribution, compute_distribution};
pub use claims::ClaimBook;
pub use determinism::{compute_distribution_root, verify_distribution_root};
pub use ratio::{RoundPricing, ScalePlan, ShareRatio};
