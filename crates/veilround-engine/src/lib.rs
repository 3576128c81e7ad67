//! # veilround-engine
//!
//! Round-batching engine for confidential capital modules. Owners submit
//! encrypted deposits, withdrawals or swap amounts; the engine folds them
//! into one encrypted net per round, reveals only that net, executes it
//! against the venue once and lets every owner claim a pro-rata share.
//!
//! ## Planes
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────────────┐
//! │ veilround-   │   │ veilround-       │   │ veilround-         │
//! │ ingress      │──▶│ settlement       │──▶│ distribution       │
//! │ (intake)     │   │ (finality)       │   │ (allocations)      │
//! └──────────────┘   └──────────────────┘   └────────────────────┘
//!          ▲                                          │
//!          └───────────── RoundEngine ◀───────────────┘
//! ```
//!
//! [`RoundEngine`] is the synchronous single writer. [`SharedEngine`] wraps
//! it for async callers, and [`EngineState`] is its serializable form.

pub mod engine;
pub mod introspection;
pub mod module;
pub mod shared;
pub mod snapshot;

pub use engine::RoundEngine;
pub use introspection::RoundSummary;
pub use module::ModuleState;
pub use shared::SharedEngine;
pub use snapshot::EngineState;
