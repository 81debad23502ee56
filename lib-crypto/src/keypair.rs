//! Node keypair generation and signing.
//!
//! Exactly one Ed25519 keypair exists per process. The node id is the hex
//! encoding of the public key and doubles as the wallet address.

use anyhow::Result;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Ed25519 node identity.
pub struct NodeKeypair {
    signing_key: SigningKey,
}

impl NodeKeypair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *seed);
        let keypair = Self {
            signing_key: SigningKey::from_bytes(&seed),
        };
        keypair.validate()?;
        Ok(keypair)
    }

    /// Rebuild a keypair from a 32-byte seed (keystore load path).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// The 32-byte secret seed, for sealing at rest.
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Hex-encoded public key. Used as node id and wallet address.
    pub fn node_id(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Sign a message, returning the signature as hex.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }

    /// Sanity check: a test signature must verify under the public key.
    fn validate(&self) -> Result<()> {
        let probe = b"orbis-keypair-validation";
        let sig = self.signing_key.sign(probe);
        self.signing_key
            .verifying_key()
            .verify(probe, &sig)
            .map_err(|_| anyhow::anyhow!("keypair validation failed: self-signature did not verify"))
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("node_id", &self.node_id())
            .finish()
    }
}

/// Verify a hex signature by a hex public key over a message.
///
/// Returns `false` for malformed keys or signatures; never panics.
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(pk_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(pk_arr) = <[u8; 32]>::try_from(pk_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_arr) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_arr);
    verifying_key.verify(message, &signature).is_ok()
}
