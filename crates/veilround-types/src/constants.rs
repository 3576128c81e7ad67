//! System-wide constants for the VeilRound batching engine.

/// Default quorum: minimum distinct owners before a round may leave Collecting.
pub const DEFAULT_MIN_DISTINCT_USERS: usize = 2;

/// Default minimum time a round stays in Collecting, in seconds.
pub const DEFAULT_MIN_TIME_BETWEEN_ROUNDS_SECS: u64 = 120;

/// Default cap on intents folded into a single round.
pub const DEFAULT_MAX_INTENTS_PER_ROUND: usize = 1 << 20;

/// Offset added to every signed contribution before encryption (2^64).
pub const ENCODING_BIAS: u128 = 1 << 64;

/// Largest clear amount a single intent may carry.
pub const MAX_INTENT_AMOUNT: u128 = u64::MAX as u128;

/// Hard limit on terms in one biased sum (keeps Σ below 2^97).
pub const MAX_ENCODED_TERMS: u64 = 1 << 32;

/// Default number of decryption polls before giving up.
pub const DEFAULT_DECRYPTION_MAX_ATTEMPTS: u32 = 20;

/// Default first backoff between decryption polls, in milliseconds.
pub const DEFAULT_DECRYPTION_INITIAL_BACKOFF_MS: u64 = 250;

/// Default ceiling for decryption poll backoff, in milliseconds.
pub const DEFAULT_DECRYPTION_MAX_BACKOFF_MS: u64 = 8_000;

/// Domain separator for gateway decryption proofs.
pub const DECRYPTION_PROOF_DOMAIN: &[u8] = b"veilround:decryption:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "VeilRound";
