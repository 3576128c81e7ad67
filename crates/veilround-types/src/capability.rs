//! Capabilities consumed from external collaborators.
//!
//! The engine never implements encryption, decryption, token custody or
//! venue logic itself. It drives them through these traits:
//!
//! - [`FheBackend`]: ciphertext handles and homomorphic arithmetic
//! - [`DecryptionOracle`]: asynchronous request/poll decryption with proofs
//! - [`CapitalVenue`]: lending pool or exchange (supply / withdraw / swap)
//! - [`ConfidentialLedger`]: confidential-token balances and transfers

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::DECRYPTION_PROOF_DOMAIN;
use crate::{
    CipherHandle, EncryptedInput, InboundTransfer, InputContext, LedgerAccount, ModuleId, OwnerId,
    Result, SettlementKey, VeilError,
};

/// Homomorphic arithmetic over 128-bit unsigned plaintexts.
///
/// Arithmetic wraps modulo 2^128. Every operation returns a fresh handle;
/// inputs are never mutated.
pub trait FheBackend {
    /// Encrypt a public constant (a "trivial" ciphertext).
    fn trivial(&mut self, value: u128) -> Result<CipherHandle>;

    /// Check an input proof and admit the 64-bit ciphertext it covers.
    ///
    /// # Errors
    /// `InvalidInputProof` if the proof does not bind the handle to `ctx`.
    fn verify_input(&mut self, input: &EncryptedInput, ctx: &InputContext)
    -> Result<CipherHandle>;

    fn add(&mut self, a: CipherHandle, b: CipherHandle) -> Result<CipherHandle>;

    fn sub(&mut self, a: CipherHandle, b: CipherHandle) -> Result<CipherHandle>;

    /// Encrypted minimum of two values.
    fn min(&mut self, a: CipherHandle, b: CipherHandle) -> Result<CipherHandle>;

    fn mul_scalar(&mut self, a: CipherHandle, k: u128) -> Result<CipherHandle>;

    /// Floor division by a public non-zero scalar.
    fn div_scalar(&mut self, a: CipherHandle, k: u128) -> Result<CipherHandle>;
}

/// Signed statement that `handle` decrypts to a given clear value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionProof {
    pub handle: CipherHandle,
    /// Ed25519 public key of the signing gateway node.
    pub signer: [u8; 32],
    /// Ed25519 signature over [`DecryptionProof::signing_message`].
    pub signature: Vec<u8>,
}

impl DecryptionProof {
    /// Message bound by the signature: domain || handle || clear (LE).
    #[must_use]
    pub fn signing_message(handle: &CipherHandle, clear: u128) -> Vec<u8> {
        let mut msg = Vec::with_capacity(DECRYPTION_PROOF_DOMAIN.len() + 32 + 16);
        msg.extend_from_slice(DECRYPTION_PROOF_DOMAIN);
        msg.extend_from_slice(handle.as_bytes());
        msg.extend_from_slice(&clear.to_le_bytes());
        msg
    }

    /// Verify the signature for `clear` against the embedded signer key.
    ///
    /// Trust in the signer itself is the gateway client's concern.
    ///
    /// # Errors
    /// `ProofInvalid` if the key or signature is malformed or does not verify.
    pub fn verify_signature(&self, clear: u128) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.signer).map_err(|e| VeilError::ProofInvalid {
            reason: format!("bad signer key: {e}"),
        })?;
        let sig_bytes: [u8; 64] =
            self.signature
                .as_slice()
                .try_into()
                .map_err(|_| VeilError::ProofInvalid {
                    reason: format!("signature must be 64 bytes, got {}", self.signature.len()),
                })?;
        let signature = Signature::from_bytes(&sig_bytes);
        key.verify(&Self::signing_message(&self.handle, clear), &signature)
            .map_err(|_| VeilError::ProofInvalid {
                reason: "signature does not match clear value".into(),
            })
    }
}

/// A clear value delivered by the gateway together with its proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionResponse {
    pub clear: u128,
    pub proof: DecryptionProof,
}

/// Asynchronous decryption service.
///
/// Decryption of a given handle is deterministic, so repeating a request is
/// always safe.
pub trait DecryptionOracle {
    /// Ask for `handle` to be decrypted. Idempotent.
    fn request(&self, handle: CipherHandle) -> Result<()>;

    /// The response, once ready.
    fn poll(&self, handle: CipherHandle) -> Result<Option<DecryptionResponse>>;
}

/// External lending pool or exchange.
///
/// Every call carries the round's [`SettlementKey`]; venues that support
/// idempotency keys must treat a repeated key as the same operation.
pub trait CapitalVenue {
    fn supply(&mut self, asset: &str, amount: u128, key: SettlementKey) -> Result<()>;

    /// Returns the amount actually received.
    fn withdraw(&mut self, asset: &str, amount: u128, key: SettlementKey) -> Result<u128>;

    /// Returns the amount of `asset_out` received.
    fn swap(
        &mut self,
        asset_in: &str,
        amount_in: u128,
        asset_out: &str,
        key: SettlementKey,
    ) -> Result<u128>;
}

/// Confidential-token ledger (balances, transfers, wrapping).
pub trait ConfidentialLedger {
    /// Encrypted balance of an account, if it has ever held the asset.
    fn confidential_balance_of(
        &self,
        asset: &str,
        account: LedgerAccount,
    ) -> Result<Option<CipherHandle>>;

    /// Move an owner-encrypted amount into the module's custody.
    ///
    /// This is the transfer-and-call path that triggers credit intents.
    /// The receipt carries the amount actually moved (zero when the owner's
    /// balance was insufficient).
    fn transfer_in(
        &mut self,
        asset: &str,
        from: OwnerId,
        to: ModuleId,
        input: &EncryptedInput,
    ) -> Result<InboundTransfer>;

    /// Redeem a receipt issued by [`ConfidentialLedger::transfer_in`].
    ///
    /// # Errors
    /// `UnverifiedTransfer` if the ledger never issued this exact receipt or
    /// it was already redeemed.
    fn acknowledge(&mut self, transfer: &InboundTransfer) -> Result<()>;

    /// Pay an encrypted amount from the module to an owner.
    fn transfer_out(
        &mut self,
        asset: &str,
        from: ModuleId,
        to: OwnerId,
        amount: CipherHandle,
    ) -> Result<CipherHandle>;

    /// Convert `amount` of the module's confidential balance to its underlying.
    fn unwrap(&mut self, asset: &str, module: ModuleId, amount: u128) -> Result<()>;

    /// Convert `amount` of the module's underlying into confidential balance.
    fn wrap(&mut self, asset: &str, module: ModuleId, amount: u128) -> Result<()>;
}
