//! Decryption gateway client.
//!
//! The only round-level decryption ever requested is that of a frozen
//! aggregate (or of a conservation-audit difference). The protocol is
//! explicitly two-phase:
//!
//! ```text
//! request(handle) → PendingDecryption (persisted on the round)
//! poll(handle) / verify(handle, clear, proof) → VerifiedDecryption
//! ```
//!
//! A proof binds the clear value to the exact handle through an ed25519
//! signature from a trusted gateway signer. Decryption is deterministic, so
//! re-requesting the same handle (for example after a restart) is always safe.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use veilround_types::{
    CipherHandle, DecryptionOracle, DecryptionProof, GatewayConfig, PendingDecryption, Result,
    RetryPolicy, VeilError,
};

/// A clear value whose proof checked out against a trusted signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDecryption {
    pub handle: CipherHandle,
    pub clear: u128,
    pub proof: DecryptionProof,
}

/// Client for an asynchronous decryption oracle.
#[derive(Debug, Clone)]
pub struct GatewayClient<O> {
    oracle: O,
    trusted: BTreeSet<[u8; 32]>,
    retry: RetryPolicy,
}

impl<O: DecryptionOracle> GatewayClient<O> {
    /// # Errors
    /// `Configuration` if the gateway config is invalid.
    pub fn new(oracle: O, config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let mut trusted = BTreeSet::new();
        for key in &config.trusted_signers {
            let bytes = hex::decode(key)
                .map_err(|e| VeilError::Configuration(format!("bad signer key {key}: {e}")))?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| VeilError::Configuration(format!("signer key {key} not 32 bytes")))?;
            trusted.insert(arr);
        }
        Ok(Self {
            oracle,
            trusted,
            retry: config.retry.clone(),
        })
    }

    #[must_use]
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Ask the oracle to decrypt `handle`.
    ///
    /// # Errors
    /// Retryable `GatewayFailure` if the oracle is unavailable.
    pub fn request(&self, handle: CipherHandle, now: DateTime<Utc>) -> Result<PendingDecryption> {
        self.oracle.request(handle)?;
        info!(handle = %handle.short(), "decryption requested");
        Ok(PendingDecryption {
            handle,
            requested_at: now,
            requests: 1,
        })
    }

    /// Re-issue a persisted request (idempotent).
    pub fn re_request(&self, pending: &mut PendingDecryption) -> Result<()> {
        self.oracle.request(pending.handle)?;
        pending.requests += 1;
        debug!(
            handle = %pending.handle.short(),
            requests = pending.requests,
            "decryption re-requested"
        );
        Ok(())
    }

    /// Check a submitted clear value and proof against `expected`.
    ///
    /// # Errors
    /// - `HandleMismatch` if the proof is bound to another handle
    /// - `ProofInvalid` if the signer is untrusted or the signature fails
    pub fn verify(
        &self,
        expected: CipherHandle,
        clear: u128,
        proof: &DecryptionProof,
    ) -> Result<VerifiedDecryption> {
        if proof.handle != expected {
            warn!(
                expected = %expected.short(),
                actual = %proof.handle.short(),
                "decryption proof for wrong handle"
            );
            return Err(VeilError::HandleMismatch {
                expected,
                actual: proof.handle,
            });
        }
        if !self.trusted.contains(&proof.signer) {
            warn!(signer = %hex::encode(&proof.signer[..4]), "untrusted decryption signer");
            return Err(VeilError::ProofInvalid {
                reason: "signer is not a trusted gateway key".into(),
            });
        }
        proof.verify_signature(clear)?;
        Ok(VerifiedDecryption {
            handle: expected,
            clear,
            proof: proof.clone(),
        })
    }

    /// Poll once; verify the response if there is one.
    pub fn poll(&self, handle: CipherHandle) -> Result<Option<VerifiedDecryption>> {
        match self.oracle.poll(handle)? {
            Some(resp) => self.verify(handle, resp.clear, &resp.proof).map(Some),
            None => Ok(None),
        }
    }

    /// Request (if needed) and poll with bounded exponential backoff.
    ///
    /// Only retryable errors are retried; a failed request is re-issued on
    /// the next attempt. Verification failures are returned immediately.
    ///
    /// # Errors
    /// `DecryptionUnavailable` once the retry budget is exhausted.
    pub async fn await_decryption(&self, handle: CipherHandle) -> Result<VerifiedDecryption> {
        let mut requested = false;
        for attempt in 0..self.retry.max_attempts {
            if !requested {
                match self.oracle.request(handle) {
                    Ok(()) => requested = true,
                    Err(e) if e.is_retryable() => {
                        warn!(handle = %handle.short(), attempt, error = %e, "decryption request failed; retrying");
                    }
                    Err(e) => return Err(e),
                }
            }
            if requested {
                match self.poll(handle) {
                    Ok(Some(verified)) => {
                        info!(handle = %handle.short(), attempt, "decryption verified");
                        return Ok(verified);
                    }
                    Ok(None) => {}
                    Err(e) if e.is_retryable() => {
                        warn!(handle = %handle.short(), attempt, error = %e, "decryption poll failed; re-requesting");
                        requested = false;
                    }
                    Err(e) => return Err(e),
                }
            }
            tokio::time::sleep(self.retry.backoff(attempt)).await;
        }
        warn!(handle = %handle.short(), attempts = self.retry.max_attempts, "decryption unavailable");
        Err(VeilError::DecryptionUnavailable { handle })
    }
}
