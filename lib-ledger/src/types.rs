//! Core ledger type aliases and protocol constants.

use serde::{Deserialize, Serialize};

/// Wallet address: hex-encoded Ed25519 public key, or a sentinel.
pub type Address = String;

/// Token amount in whole ETHC units.
pub type Amount = u64;

/// Block height.
pub type BlockHeight = u64;

/// Transaction id: SHA-256 of the canonical tx body, hex-encoded.
pub type TxId = String;

/// Sender of system-originated transactions (mint, slash).
pub const SYSTEM_SENDER: &str = "system";

/// Address holding the genesis supply.
pub const TREASURY_ADDRESS: &str = "treasury";

/// Total supply minted in the genesis block, in ETHC.
pub const GENESIS_SUPPLY: Amount = 10_000_000;

/// Genesis blocks carry this fixed timestamp so every node derives the same
/// genesis hash for a given designated validator.
pub const GENESIS_TIMESTAMP: u64 = 0;

/// Per-address balance split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub liquid: Amount,
    pub staked: Amount,
}
