//! Encrypted key storage.
//!
//! The secret seed is sealed at rest with AES-256-GCM under a key derived
//! from the operator passphrase with Argon2id. The on-disk format is a
//! versioned JSON envelope; the public key is stored alongside in plain hex.
//!
//! Loading with the wrong passphrase fails with [`KeystoreError::Auth`], and
//! the process must refuse to start without a passphrase in production.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keypair::NodeKeypair;

const ENVELOPE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Keystore failure modes.
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("decryption failed (wrong passphrase?)")]
    Auth,

    #[error("malformed keystore file: {0}")]
    Malformed(String),

    #[error("unsupported keystore version {0}")]
    UnsupportedVersion(u32),

    #[error("key derivation failed")]
    Derivation,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk envelope for the sealed secret key.
#[derive(Serialize, Deserialize)]
struct SealedKey {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
    cipher: String,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, KeystoreError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
        .map_err(|_| KeystoreError::Derivation)?;
    Ok(key)
}

/// Seal the keypair's secret seed and write it to `path`.
///
/// The matching public key is written next to it with a `.pk` extension so
/// peers and tooling can read the node id without the passphrase.
pub fn store_encrypted(
    keypair: &NodeKeypair,
    path: &Path,
    passphrase: &str,
) -> Result<(), KeystoreError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
    let seed = keypair.seed();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), &seed[..])
        .map_err(|_| KeystoreError::Auth)?;

    let envelope = SealedKey {
        version: ENVELOPE_VERSION,
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
        cipher: "aes-256-gcm".to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(
        path,
        serde_json::to_string_pretty(&envelope)
            .map_err(|e| KeystoreError::Malformed(e.to_string()))?,
    )?;
    fs::write(path.with_extension("pk"), keypair.node_id())?;
    Ok(())
}

/// Load and unseal a keypair from `path` using `passphrase`.
pub fn load_encrypted(path: &Path, passphrase: &str) -> Result<NodeKeypair, KeystoreError> {
    let raw = fs::read_to_string(path)?;
    let envelope: SealedKey =
        serde_json::from_str(&raw).map_err(|e| KeystoreError::Malformed(e.to_string()))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(KeystoreError::UnsupportedVersion(envelope.version));
    }

    let salt = BASE64
        .decode(&envelope.salt)
        .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
    let nonce = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
    if nonce.len() != NONCE_LEN {
        return Err(KeystoreError::Malformed("bad nonce length".to_string()));
    }

    let key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
    let seed_bytes = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| KeystoreError::Auth)?,
    );
    let seed: [u8; 32] = seed_bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeystoreError::Malformed("bad seed length".to_string()))?;
    Ok(NodeKeypair::from_seed(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node_identity.sk");
        let kp = NodeKeypair::generate().unwrap();

        store_encrypted(&kp, &path, "correct horse").unwrap();
        let loaded = load_encrypted(&path, "correct horse").unwrap();
        assert_eq!(kp.node_id(), loaded.node_id());

        // Public key sidecar readable without the passphrase
        let pk = std::fs::read_to_string(path.with_extension("pk")).unwrap();
        assert_eq!(pk, kp.node_id());
    }

    #[test]
    fn test_wrong_passphrase_is_auth_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node_identity.sk");
        let kp = NodeKeypair::generate().unwrap();

        store_encrypted(&kp, &path, "right").unwrap();
        match load_encrypted(&path, "wrong") {
            Err(KeystoreError::Auth) => {}
            other => panic!("expected Auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_envelope_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node_identity.sk");
        std::fs::write(&path, "not json at all").unwrap();
        match load_encrypted(&path, "any") {
            Err(KeystoreError::Malformed(_)) => {}
            other => panic!("expected Malformed error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.sk");
        assert!(matches!(
            load_encrypted(&path, "x"),
            Err(KeystoreError::Io(_))
        ));
    }
}
