//! Async, shareable front for a [`RoundEngine`].
//!
//! Every mutation takes the engine lock, so intents from concurrent tasks
//! are folded one at a time. Waiting on the decryption gateway happens with
//! the lock released: intake into the next round keeps flowing while a
//! frozen round is being decrypted.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use veilround_settlement::{AuditReport, GatewayClient};
use veilround_types::{
    Allocation, CapitalVenue, ConfidentialLedger, DecryptionOracle, Direction,
    EncryptedInput, FheBackend, Intent, ModuleId, OwnerId, Result, RoundId, SettlementResult,
};

use crate::RoundEngine;

/// Cloneable handle to an engine behind an async mutex.
pub struct SharedEngine<F, O, V, L> {
    inner: Arc<AsyncMutex<RoundEngine<F, O, V, L>>>,
    gateway: GatewayClient<O>,
}

impl<F, O: Clone, V, L> Clone for SharedEngine<F, O, V, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            gateway: self.gateway.clone(),
        }
    }
}

impl<F, O, V, L> SharedEngine<F, O, V, L>
where
    F: FheBackend,
    O: DecryptionOracle + Clone,
    V: CapitalVenue,
    L: ConfidentialLedger,
{
    #[must_use]
    pub fn new(engine: RoundEngine<F, O, V, L>) -> Self {
        let gateway = engine.gateway().clone();
        Self {
            inner: Arc::new(AsyncMutex::new(engine)),
            gateway,
        }
    }

    /// Run `f` with exclusive access to the engine.
    pub async fn with<R>(&self, f: impl FnOnce(&mut RoundEngine<F, O, V, L>) -> R) -> R {
        let mut engine = self.inner.lock().await;
        f(&mut engine)
    }

    pub async fn submit_intent(
        &self,
        module: ModuleId,
        owner: OwnerId,
        direction: Direction,
        input: &EncryptedInput,
    ) -> Result<Intent> {
        self.with(|e| e.submit_intent(module, owner, direction, input, Utc::now()))
            .await
    }

    pub async fn request_withdraw(
        &self,
        module: ModuleId,
        owner: OwnerId,
        input: &EncryptedInput,
    ) -> Result<Intent> {
        self.with(|e| e.request_withdraw(module, owner, input, Utc::now()))
            .await
    }

    pub async fn advance_round(&self, module: ModuleId) -> Result<RoundId> {
        self.with(|e| e.advance_round(module)).await
    }

    pub async fn claim(&self, module: ModuleId, owner: OwnerId, round: RoundId) -> Result<Allocation> {
        self.with(|e| e.claim(module, owner, round, Utc::now())).await
    }

    pub async fn snapshot(&self) -> Result<String> {
        self.with(|e| e.snapshot()).await
    }

    /// Request, await and apply the decryption of the pending round.
    ///
    /// # Errors
    /// `NoPendingRound`, `DecryptionUnavailable` once the retry budget is
    /// spent, or any `settle_round` error.
    pub async fn settle_pending(&self, module: ModuleId) -> Result<SettlementResult> {
        let pending = self.with(|e| e.request_decryption(module, Utc::now())).await?;
        debug!(%module, handle = %pending.handle, "awaiting round decryption");
        let verified = self.gateway.await_decryption(pending.handle).await?;
        let result = self
            .with(|e| e.settle_round(module, verified.clear, &verified.proof, Utc::now()))
            .await?;
        info!(%module, round = %result.round, "pending round settled");
        Ok(result)
    }

    /// Run a full conservation audit of `module`.
    ///
    /// # Errors
    /// `DecryptionUnavailable`, `ConservationViolation` or any audit error.
    pub async fn audit(&self, module: ModuleId) -> Result<AuditReport> {
        let audit = self
            .with(|e| e.prepare_conservation_audit(module, Utc::now()))
            .await?;
        let verified = self.gateway.await_decryption(audit.handle).await?;
        self.with(|e| e.verify_conservation_audit(module, verified.clear, &verified.proof))
            .await
    }
}
