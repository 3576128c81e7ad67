//! In-memory simulated collaborators for tests and demos.
//!
//! Only available with the `test-helpers` feature. Each simulator is a
//! cheap-to-clone handle over shared state so a test can keep one clone for
//! inspection while the engine owns another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::{
    AssetId, CapitalVenue, CipherHandle, ConfidentialLedger, DecryptionOracle, DecryptionProof,
    DecryptionResponse, EncryptedInput, FheBackend, InboundTransfer, InputContext, LedgerAccount,
    ModuleId, OwnerId, Result, SettlementKey, VeilError, constants::MAX_INTENT_AMOUNT,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// SimFhe: clear-text homomorphic backend + decryption oracle
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SimFheState {
    values: HashMap<CipherHandle, u128>,
    rng: StdRng,
    oracle_key: SigningKey,
    /// Outstanding requests and the polls left before they resolve.
    requests: HashMap<CipherHandle, u32>,
    latency_polls: u32,
    fail_next_requests: u32,
    request_log: Vec<CipherHandle>,
}

/// Clear-text simulation of the homomorphic backend.
///
/// Values are stored in clear behind random handles, so tests can
/// [`SimFhe::peek`] at any ciphertext. The same handle also acts as the
/// decryption oracle, signing responses with an ed25519 key.
#[derive(Debug, Clone)]
pub struct SimFhe {
    inner: Arc<Mutex<SimFheState>>,
}

impl SimFhe {
    /// Deterministic simulator (handles and oracle key derive from `seed`).
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes);
        Self {
            inner: Arc::new(Mutex::new(SimFheState {
                values: HashMap::new(),
                rng,
                oracle_key: SigningKey::from_bytes(&key_bytes),
                requests: HashMap::new(),
                latency_polls: 0,
                fail_next_requests: 0,
                request_log: Vec::new(),
            })),
        }
    }

    /// Hex-encoded public key of the simulated oracle.
    #[must_use]
    pub fn oracle_public_key_hex(&self) -> String {
        hex::encode(lock(&self.inner).oracle_key.verifying_key().to_bytes())
    }

    /// Store a clear value under a fresh handle.
    #[must_use]
    pub fn store(&self, value: u128) -> CipherHandle {
        let mut state = lock(&self.inner);
        let mut bytes = [0u8; 32];
        state.rng.fill(&mut bytes);
        let handle = CipherHandle(bytes);
        state.values.insert(handle, value);
        handle
    }

    /// Clear value behind a handle (test-only insight).
    #[must_use]
    pub fn peek(&self, handle: CipherHandle) -> Option<u128> {
        lock(&self.inner).values.get(&handle).copied()
    }

    fn value(&self, handle: CipherHandle) -> Result<u128> {
        self.peek(handle).ok_or(VeilError::MalformedHandle(handle))
    }

    fn input_proof(handle: &CipherHandle, ctx: &InputContext) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(b"veilround:sim-input:v1:");
        hasher.update(handle.as_bytes());
        hasher.update(ctx.owner.0.as_bytes());
        hasher.update(ctx.module.0.to_le_bytes());
        hasher.finalize().to_vec()
    }

    /// Client-side encryption: a 64-bit value bound to `ctx`.
    #[must_use]
    pub fn encrypt_input(&self, value: u64, ctx: InputContext) -> EncryptedInput {
        let handle = self.store(u128::from(value));
        EncryptedInput {
            proof: Self::input_proof(&handle, &ctx),
            handle,
        }
    }

    /// Sign a decryption of `handle` right away, bypassing request/poll.
    ///
    /// # Errors
    /// `MalformedHandle` if the handle is unknown.
    pub fn decrypt_now(&self, handle: CipherHandle) -> Result<DecryptionResponse> {
        let clear = self.value(handle)?;
        Ok(self.sign(handle, clear))
    }

    /// Sign an arbitrary (possibly false) clear value for `handle`.
    #[must_use]
    pub fn sign(&self, handle: CipherHandle, clear: u128) -> DecryptionResponse {
        let state = lock(&self.inner);
        let signature = state
            .oracle_key
            .sign(&DecryptionProof::signing_message(&handle, clear));
        DecryptionResponse {
            clear,
            proof: DecryptionProof {
                handle,
                signer: state.oracle_key.verifying_key().to_bytes(),
                signature: signature.to_bytes().to_vec(),
            },
        }
    }

    /// Polls needed after a request before the response is ready.
    pub fn set_latency_polls(&self, polls: u32) {
        lock(&self.inner).latency_polls = polls;
    }

    /// Make the next `n` oracle requests fail with a gateway error.
    pub fn fail_next_requests(&self, n: u32) {
        lock(&self.inner).fail_next_requests = n;
    }

    /// Every handle ever accepted by [`DecryptionOracle::request`].
    #[must_use]
    pub fn requested_handles(&self) -> Vec<CipherHandle> {
        lock(&self.inner).request_log.clone()
    }

    fn binary(
        &self,
        a: CipherHandle,
        b: CipherHandle,
        op: impl FnOnce(u128, u128) -> u128,
    ) -> Result<CipherHandle> {
        let (x, y) = (self.value(a)?, self.value(b)?);
        Ok(self.store(op(x, y)))
    }
}

impl FheBackend for SimFhe {
    fn trivial(&mut self, value: u128) -> Result<CipherHandle> {
        Ok(self.store(value))
    }

    fn verify_input(
        &mut self,
        input: &EncryptedInput,
        ctx: &InputContext,
    ) -> Result<CipherHandle> {
        if input.proof != Self::input_proof(&input.handle, ctx) {
            return Err(VeilError::InvalidInputProof {
                reason: format!("proof not bound to {} in {}", ctx.owner, ctx.module),
            });
        }
        let value = self.value(input.handle)?;
        if value > MAX_INTENT_AMOUNT {
            return Err(VeilError::InvalidInputProof {
                reason: "input is not a 64-bit ciphertext".into(),
            });
        }
        Ok(input.handle)
    }

    fn add(&mut self, a: CipherHandle, b: CipherHandle) -> Result<CipherHandle> {
        self.binary(a, b, u128::wrapping_add)
    }

    fn sub(&mut self, a: CipherHandle, b: CipherHandle) -> Result<CipherHandle> {
        self.binary(a, b, u128::wrapping_sub)
    }

    fn min(&mut self, a: CipherHandle, b: CipherHandle) -> Result<CipherHandle> {
        self.binary(a, b, u128::min)
    }

    fn mul_scalar(&mut self, a: CipherHandle, k: u128) -> Result<CipherHandle> {
        let x = self.value(a)?;
        Ok(self.store(x.wrapping_mul(k)))
    }

    fn div_scalar(&mut self, a: CipherHandle, k: u128) -> Result<CipherHandle> {
        if k == 0 {
            return Err(VeilError::InvariantViolation {
                reason: "division by zero scalar".into(),
            });
        }
        let x = self.value(a)?;
        Ok(self.store(x / k))
    }
}

impl DecryptionOracle for SimFhe {
    fn request(&self, handle: CipherHandle) -> Result<()> {
        let mut state = lock(&self.inner);
        if state.fail_next_requests > 0 {
            state.fail_next_requests -= 1;
            return Err(VeilError::GatewayFailure {
                reason: "simulated gateway outage".into(),
            });
        }
        if !state.values.contains_key(&handle) {
            return Err(VeilError::MalformedHandle(handle));
        }
        let latency = state.latency_polls;
        state.requests.entry(handle).or_insert(latency);
        state.request_log.push(handle);
        Ok(())
    }

    fn poll(&self, handle: CipherHandle) -> Result<Option<DecryptionResponse>> {
        {
            let mut state = lock(&self.inner);
            match state.requests.get_mut(&handle) {
                None => return Ok(None),
                Some(left) if *left > 0 => {
                    *left -= 1;
                    return Ok(None);
                }
                Some(_) => {}
            }
        }
        self.decrypt_now(handle).map(Some)
    }
}

// ---------------------------------------------------------------------------
// SimVenue: lending pool + constant-rate exchange
// ---------------------------------------------------------------------------

/// One executed venue call, as seen by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueCall {
    Supply {
        asset: AssetId,
        amount: u128,
        key: SettlementKey,
    },
    Withdraw {
        asset: AssetId,
        amount: u128,
        key: SettlementKey,
    },
    Swap {
        asset_in: AssetId,
        amount_in: u128,
        asset_out: AssetId,
        key: SettlementKey,
    },
}

struct SimVenueState {
    supplied: HashMap<AssetId, u128>,
    /// Withdraw payout in basis points of the requested amount.
    withdraw_bps: u128,
    rates: HashMap<(AssetId, AssetId), (u128, u128)>,
    fail_next: u32,
    calls: Vec<VenueCall>,
    completed: HashMap<SettlementKey, u128>,
}

/// Simulated capital venue.
///
/// Deduplicates by [`SettlementKey`]: a key that already succeeded returns
/// the recorded result without executing (or logging) again.
#[derive(Clone)]
pub struct SimVenue {
    inner: Arc<Mutex<SimVenueState>>,
}

impl Default for SimVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl SimVenue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimVenueState {
                supplied: HashMap::new(),
                withdraw_bps: 10_000,
                rates: HashMap::new(),
                fail_next: 0,
                calls: Vec::new(),
                completed: HashMap::new(),
            })),
        }
    }

    /// Exchange rate `asset_in → asset_out` as `out = in * num / den`.
    pub fn set_rate(&self, asset_in: &str, asset_out: &str, num: u128, den: u128) {
        lock(&self.inner)
            .rates
            .insert((asset_in.to_string(), asset_out.to_string()), (num, den));
    }

    /// Withdrawals pay `requested * bps / 10_000` (yield above 10_000).
    pub fn set_withdraw_bps(&self, bps: u128) {
        lock(&self.inner).withdraw_bps = bps;
    }

    /// Pre-fund the pool (liquidity from outside the module).
    pub fn seed_liquidity(&self, asset: &str, amount: u128) {
        *lock(&self.inner).supplied.entry(asset.to_string()).or_default() += amount;
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: u32) {
        lock(&self.inner).fail_next = n;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<VenueCall> {
        lock(&self.inner).calls.clone()
    }

    #[must_use]
    pub fn supplied(&self, asset: &str) -> u128 {
        lock(&self.inner).supplied.get(asset).copied().unwrap_or(0)
    }

    fn begin(
        state: &mut SimVenueState,
        key: SettlementKey,
        op: &str,
        amount: u128,
    ) -> Result<Option<u128>> {
        if amount == 0 {
            return Err(VeilError::NonPositiveAmount {
                context: format!("venue {op}"),
            });
        }
        if let Some(done) = state.completed.get(&key) {
            return Ok(Some(*done));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(VeilError::VenueFailure {
                reason: "simulated venue revert".into(),
            });
        }
        Ok(None)
    }
}

impl CapitalVenue for SimVenue {
    fn supply(&mut self, asset: &str, amount: u128, key: SettlementKey) -> Result<()> {
        let mut state = lock(&self.inner);
        if Self::begin(&mut state, key, "supply", amount)?.is_some() {
            return Ok(());
        }
        *state.supplied.entry(asset.to_string()).or_default() += amount;
        state.calls.push(VenueCall::Supply {
            asset: asset.to_string(),
            amount,
            key,
        });
        state.completed.insert(key, amount);
        Ok(())
    }

    fn withdraw(&mut self, asset: &str, amount: u128, key: SettlementKey) -> Result<u128> {
        let mut state = lock(&self.inner);
        if let Some(done) = Self::begin(&mut state, key, "withdraw", amount)? {
            return Ok(done);
        }
        let pool = state.supplied.get(asset).copied().unwrap_or(0);
        if pool < amount {
            return Err(VeilError::VenueFailure {
                reason: format!("insufficient {asset} liquidity"),
            });
        }
        state.supplied.insert(asset.to_string(), pool - amount);
        let received = amount * state.withdraw_bps / 10_000;
        state.calls.push(VenueCall::Withdraw {
            asset: asset.to_string(),
            amount,
            key,
        });
        state.completed.insert(key, received);
        Ok(received)
    }

    fn swap(
        &mut self,
        asset_in: &str,
        amount_in: u128,
        asset_out: &str,
        key: SettlementKey,
    ) -> Result<u128> {
        let mut state = lock(&self.inner);
        if let Some(done) = Self::begin(&mut state, key, "swap", amount_in)? {
            return Ok(done);
        }
        let (num, den) = state
            .rates
            .get(&(asset_in.to_string(), asset_out.to_string()))
            .copied()
            .ok_or_else(|| VeilError::VenueFailure {
                reason: format!("no route {asset_in} -> {asset_out}"),
            })?;
        let out = amount_in
            .checked_mul(num)
            .map(|v| v / den.max(1))
            .ok_or_else(|| VeilError::VenueFailure {
                reason: "swap output overflow".into(),
            })?;
        state.calls.push(VenueCall::Swap {
            asset_in: asset_in.to_string(),
            amount_in,
            asset_out: asset_out.to_string(),
            key,
        });
        state.completed.insert(key, out);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// SimLedger: confidential token ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SimLedgerState {
    balances: HashMap<(AssetId, LedgerAccount), u128>,
    underlying: HashMap<(AssetId, ModuleId), u128>,
    seen_inputs: HashSet<CipherHandle>,
    /// Issued transfer receipts not yet acknowledged, by moved handle.
    receipts: HashMap<CipherHandle, InboundTransfer>,
}

/// Simulated confidential-token ledger sharing a [`SimFhe`].
///
/// Like real confidential tokens, a transfer with insufficient balance
/// moves zero instead of failing (failing would leak the balance).
#[derive(Clone)]
pub struct SimLedger {
    fhe: SimFhe,
    inner: Arc<Mutex<SimLedgerState>>,
}

impl SimLedger {
    #[must_use]
    pub fn new(fhe: SimFhe) -> Self {
        Self {
            fhe,
            inner: Arc::new(Mutex::new(SimLedgerState::default())),
        }
    }

    /// Mint confidential tokens to an owner.
    pub fn mint(&self, asset: &str, owner: OwnerId, amount: u128) {
        *lock(&self.inner)
            .balances
            .entry((asset.to_string(), LedgerAccount::Owner(owner)))
            .or_default() += amount;
    }

    /// Clear balance of an account (test-only insight).
    #[must_use]
    pub fn balance(&self, asset: &str, account: LedgerAccount) -> u128 {
        lock(&self.inner)
            .balances
            .get(&(asset.to_string(), account))
            .copied()
            .unwrap_or(0)
    }

    /// Underlying (unwrapped) balance held by a module.
    #[must_use]
    pub fn underlying(&self, asset: &str, module: ModuleId) -> u128 {
        lock(&self.inner)
            .underlying
            .get(&(asset.to_string(), module))
            .copied()
            .unwrap_or(0)
    }

    fn move_clear(
        state: &mut SimLedgerState,
        asset: &str,
        from: LedgerAccount,
        to: LedgerAccount,
        amount: u128,
    ) -> u128 {
        let available = state
            .balances
            .get(&(asset.to_string(), from))
            .copied()
            .unwrap_or(0);
        let moved = if available >= amount { amount } else { 0 };
        state
            .balances
            .insert((asset.to_string(), from), available - moved);
        *state.balances.entry((asset.to_string(), to)).or_default() += moved;
        moved
    }
}

impl ConfidentialLedger for SimLedger {
    fn confidential_balance_of(
        &self,
        asset: &str,
        account: LedgerAccount,
    ) -> Result<Option<CipherHandle>> {
        let clear = lock(&self.inner)
            .balances
            .get(&(asset.to_string(), account))
            .copied();
        Ok(clear.map(|v| self.fhe.store(v)))
    }

    fn transfer_in(
        &mut self,
        asset: &str,
        from: OwnerId,
        to: ModuleId,
        input: &EncryptedInput,
    ) -> Result<InboundTransfer> {
        let ctx = InputContext {
            owner: from,
            module: to,
        };
        let handle = self.fhe.verify_input(input, &ctx)?;
        let amount = self.fhe.value(handle)?;
        let mut state = lock(&self.inner);
        if !state.seen_inputs.insert(handle) {
            return Err(VeilError::InvalidInputProof {
                reason: "input already spent".into(),
            });
        }
        let moved = Self::move_clear(
            &mut state,
            asset,
            LedgerAccount::Owner(from),
            LedgerAccount::Module(to),
            amount,
        );
        let transfer = InboundTransfer {
            asset: asset.to_string(),
            from,
            to,
            moved: self.fhe.store(moved),
        };
        state.receipts.insert(transfer.moved, transfer.clone());
        Ok(transfer)
    }

    fn acknowledge(&mut self, transfer: &InboundTransfer) -> Result<()> {
        let mut state = lock(&self.inner);
        match state.receipts.get(&transfer.moved) {
            Some(issued) if issued == transfer => {
                state.receipts.remove(&transfer.moved);
                Ok(())
            }
            Some(_) => Err(VeilError::UnverifiedTransfer {
                reason: format!("receipt {} altered", transfer.moved.short()),
            }),
            None => Err(VeilError::UnverifiedTransfer {
                reason: format!("no outstanding receipt {}", transfer.moved.short()),
            }),
        }
    }

    fn transfer_out(
        &mut self,
        asset: &str,
        from: ModuleId,
        to: OwnerId,
        amount: CipherHandle,
    ) -> Result<CipherHandle> {
        let value = self.fhe.value(amount)?;
        let mut state = lock(&self.inner);
        let moved = Self::move_clear(
            &mut state,
            asset,
            LedgerAccount::Module(from),
            LedgerAccount::Owner(to),
            value,
        );
        if moved != value {
            return Err(VeilError::LedgerFailure {
                reason: format!("{from} cannot cover payout in {asset}"),
            });
        }
        drop(state);
        Ok(self.fhe.store(moved))
    }

    fn unwrap(&mut self, asset: &str, module: ModuleId, amount: u128) -> Result<()> {
        let mut state = lock(&self.inner);
        let key = (asset.to_string(), LedgerAccount::Module(module));
        let balance = state.balances.get(&key).copied().unwrap_or(0);
        if balance < amount {
            return Err(VeilError::LedgerFailure {
                reason: format!("{module} holds less {asset} than {amount}"),
            });
        }
        state.balances.insert(key, balance - amount);
        *state
            .underlying
            .entry((asset.to_string(), module))
            .or_default() += amount;
        Ok(())
    }

    fn wrap(&mut self, asset: &str, module: ModuleId, amount: u128) -> Result<()> {
        let mut state = lock(&self.inner);
        let underlying = state
            .underlying
            .entry((asset.to_string(), module))
            .or_default();
        *underlying = underlying.saturating_sub(amount);
        *state
            .balances
            .entry((asset.to_string(), LedgerAccount::Module(module)))
            .or_default() += amount;
        Ok(())
    }
}
