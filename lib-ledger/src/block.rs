//! Blocks and block headers.
//!
//! The block hash covers `(height, prev_hash, merkle_root, validator,
//! timestamp)` in canonical encoding. The validator's signature covers the
//! block hash. The genesis block is derived deterministically from the
//! designated validator and carries no signature.

use serde::{Deserialize, Serialize};
use serde_json::json;

use lib_crypto::{canonical_json_bytes, sha256_hex, unix_now, verify_signature, NodeKeypair};

use crate::merkle::merkle_root;
use crate::transaction::{Transaction, TxKind};
use crate::types::{Address, GENESIS_SUPPLY, GENESIS_TIMESTAMP, TREASURY_ADDRESS};

/// A sealed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub prev_hash: String,
    pub merkle_root: String,
    pub validator: Address,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    /// Hex Ed25519 signature over the block hash; empty only at genesis.
    pub signature: String,
}

/// Fields the block hash commits to, in canonical order.
#[derive(Serialize)]
struct HashInput<'a> {
    height: u64,
    prev_hash: &'a str,
    merkle_root: &'a str,
    validator: &'a str,
    timestamp: u64,
}

impl Block {
    /// Recompute the block hash from the header fields.
    pub fn hash(&self) -> String {
        sha256_hex(&canonical_json_bytes(&HashInput {
            height: self.height,
            prev_hash: &self.prev_hash,
            merkle_root: &self.merkle_root,
            validator: &self.validator,
            timestamp: self.timestamp,
        }))
    }

    /// Verify the validator signature over the block hash.
    pub fn verify_signature(&self) -> bool {
        verify_signature(&self.validator, self.hash().as_bytes(), &self.signature)
    }

    /// Header view carrying enough to re-verify the seal in isolation
    /// (double-sign evidence, sync summaries).
    pub fn header(&self) -> SignedHeader {
        SignedHeader {
            height: self.height,
            prev_hash: self.prev_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            validator: self.validator.clone(),
            timestamp: self.timestamp,
            signature: self.signature.clone(),
        }
    }

    /// Ids of the contained transactions.
    pub fn tx_ids(&self) -> Vec<String> {
        self.transactions.iter().map(|tx| tx.id.clone()).collect()
    }
}

/// A block header plus its validator signature, verifiable standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedHeader {
    pub height: u64,
    pub prev_hash: String,
    pub merkle_root: String,
    pub validator: Address,
    pub timestamp: u64,
    pub signature: String,
}

impl SignedHeader {
    pub fn hash(&self) -> String {
        sha256_hex(&canonical_json_bytes(&HashInput {
            height: self.height,
            prev_hash: &self.prev_hash,
            merkle_root: &self.merkle_root,
            validator: &self.validator,
            timestamp: self.timestamp,
        }))
    }

    pub fn verify(&self) -> bool {
        verify_signature(&self.validator, self.hash().as_bytes(), &self.signature)
    }
}

/// Builder for sealing a new block over the current tip.
#[derive(Debug)]
pub struct BlockBuilder {
    height: u64,
    prev_hash: String,
    timestamp: u64,
    transactions: Vec<Transaction>,
}

impl BlockBuilder {
    pub fn new(prev_hash: String, height: u64) -> Self {
        Self {
            height,
            prev_hash,
            timestamp: unix_now(),
            transactions: Vec::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn transactions(mut self, transactions: Vec<Transaction>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Seal the block with the validator's key.
    pub fn seal(self, keypair: &NodeKeypair) -> Block {
        let root = merkle_root(
            &self
                .transactions
                .iter()
                .map(|tx| tx.id.as_str())
                .collect::<Vec<_>>(),
        );
        let mut block = Block {
            height: self.height,
            prev_hash: self.prev_hash,
            merkle_root: root,
            validator: keypair.node_id(),
            timestamp: self.timestamp,
            transactions: self.transactions,
            signature: String::new(),
        };
        block.signature = keypair.sign_hex(block.hash().as_bytes());
        block
    }
}

/// Deterministic genesis block for a designated validator.
///
/// Height 0, all-zero previous hash, a single mint seeding the treasury with
/// the total supply, fixed timestamp. Every node configured with the same
/// designated validator derives the same genesis hash.
pub fn build_genesis(designated_validator: &Address) -> Block {
    let mut mint = Transaction::system(
        TxKind::MintReward,
        Some(TREASURY_ADDRESS.to_string()),
        Some(GENESIS_SUPPLY),
        json!({"note": "genesis supply"}),
    );
    mint.timestamp = GENESIS_TIMESTAMP;
    mint.id = mint.compute_id();

    let root = merkle_root(&[mint.id.as_str()]);
    Block {
        height: 0,
        prev_hash: lib_crypto::hashing::zero_hash(),
        merkle_root: root,
        validator: designated_validator.clone(),
        timestamp: GENESIS_TIMESTAMP,
        transactions: vec![mint],
        signature: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic() {
        let validator = "ab".repeat(32);
        let a = build_genesis(&validator);
        let b = build_genesis(&validator);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.height, 0);
        assert_eq!(a.prev_hash, "0".repeat(64));
        assert_eq!(a.transactions.len(), 1);
        assert_eq!(a.transactions[0].amount, Some(GENESIS_SUPPLY));
    }

    #[test]
    fn test_sealed_block_verifies() {
        let kp = NodeKeypair::generate().unwrap();
        let block = BlockBuilder::new("0".repeat(64), 1)
            .transactions(vec![Transaction::system(
                TxKind::MintReward,
                Some("alice".into()),
                Some(1),
                json!({}),
            )])
            .seal(&kp);
        assert!(block.verify_signature());
        assert!(block.header().verify());
        assert_eq!(block.header().hash(), block.hash());
    }

    #[test]
    fn test_hash_changes_with_header_fields() {
        let kp = NodeKeypair::generate().unwrap();
        let block = BlockBuilder::new("0".repeat(64), 1).seal(&kp);
        let mut altered = block.clone();
        altered.timestamp += 1;
        assert_ne!(altered.hash(), block.hash());
        assert!(!altered.verify_signature());
    }

    #[test]
    fn test_merkle_root_matches_transactions() {
        let kp = NodeKeypair::generate().unwrap();
        let txs: Vec<Transaction> = (0..3)
            .map(|i| Transaction::system(TxKind::MintReward, Some(format!("a{i}")), Some(1), json!({})))
            .collect();
        let block = BlockBuilder::new("0".repeat(64), 1).transactions(txs).seal(&kp);
        let ids = block.tx_ids();
        assert_eq!(block.merkle_root, merkle_root(&ids));
    }
}
