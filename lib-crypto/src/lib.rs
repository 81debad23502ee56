//! Orbis Ethica Cryptography Foundation
//!
//! Ed25519 node identity, encrypted key storage, canonical JSON encoding
//! and signed-request authentication for the API boundary.

pub mod canonical;
pub mod hashing;
pub mod keypair;
pub mod keystore;
pub mod request_auth;
pub mod time;

pub use canonical::{canonical_json, canonical_json_bytes};
pub use hashing::{sha256_hex, sha256_raw};
pub use keypair::{NodeKeypair, verify_signature};
pub use keystore::{load_encrypted, store_encrypted, KeystoreError};
pub use request_auth::{sign_request, verify_request, AuthError, SignedHeaders, REPLAY_WINDOW_SECS};
pub use time::unix_now;
