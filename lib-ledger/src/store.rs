//! Sled-backed chain persistence.
//!
//! Tree names are protocol; changing them breaks existing data dirs.
//! The active chain lives in `blocks_by_height`; side blocks are retained
//! for audit in `side_blocks`. Startup replays the active chain into memory
//! and refuses to serve on any integrity failure.

use std::path::Path;

use sled::{Db, Tree};
use thiserror::Error;
use tracing::{info, warn};

use crate::block::Block;

const TREE_BLOCKS_BY_HEIGHT: &str = "blocks_by_height";
const TREE_SIDE_BLOCKS: &str = "side_blocks";
const TREE_META: &str = "meta";

const META_GENESIS: &[u8] = b"genesis_hash";

/// Persistence failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt block record at height {height}: {reason}")]
    Corrupt { height: u64, reason: String },

    #[error("chain integrity violated at height {height}: {reason}")]
    Integrity { height: u64, reason: String },
}

/// Append store for blocks plus chain metadata.
pub struct ChainDb {
    _db: Db,
    blocks_by_height: Tree,
    side_blocks: Tree,
    meta: Tree,
}

impl ChainDb {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            blocks_by_height: db.open_tree(TREE_BLOCKS_BY_HEIGHT)?,
            side_blocks: db.open_tree(TREE_SIDE_BLOCKS)?,
            meta: db.open_tree(TREE_META)?,
            _db: db,
        })
    }

    /// Stored genesis hash, if the store has been initialized.
    pub fn genesis_hash(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .meta
            .get(META_GENESIS)?
            .map(|v| String::from_utf8_lossy(&v).to_string()))
    }

    pub fn set_genesis_hash(&self, hash: &str) -> Result<(), StoreError> {
        self.meta.insert(META_GENESIS, hash.as_bytes())?;
        Ok(())
    }

    /// Write an active-chain block at its height.
    pub fn put_active(&self, block: &Block) -> Result<(), StoreError> {
        let value = serde_json::to_vec(block).map_err(|e| StoreError::Corrupt {
            height: block.height,
            reason: e.to_string(),
        })?;
        self.blocks_by_height
            .insert(block.height.to_be_bytes(), value)?;
        Ok(())
    }

    /// Retain a non-active block for audit, keyed by hash.
    pub fn put_side(&self, block: &Block) -> Result<(), StoreError> {
        let value = serde_json::to_vec(block).map_err(|e| StoreError::Corrupt {
            height: block.height,
            reason: e.to_string(),
        })?;
        self.side_blocks.insert(block.hash().as_bytes(), value)?;
        Ok(())
    }

    /// Rewrite the active tail after a reorg: heights above `from_height`
    /// are dropped (their blocks were already retained as side blocks by the
    /// caller) and the new canonical blocks written.
    pub fn rewrite_from(&self, from_height: u64, blocks: &[Block]) -> Result<(), StoreError> {
        let stale: Vec<sled::IVec> = self
            .blocks_by_height
            .range((from_height + 1).to_be_bytes()..)
            .filter_map(|kv| kv.ok().map(|(k, _)| k))
            .collect();
        for key in stale {
            self.blocks_by_height.remove(key)?;
        }
        for block in blocks {
            self.put_active(block)?;
        }
        Ok(())
    }

    /// Load the active chain ascending by height, verifying the height keys
    /// are dense. Link/signature integrity is checked by the chain replay.
    pub fn load_active(&self) -> Result<Vec<Block>, StoreError> {
        let mut blocks = Vec::new();
        for (expected, kv) in self.blocks_by_height.iter().enumerate() {
            let (key, value) = kv?;
            let height = u64::from_be_bytes(key.as_ref().try_into().map_err(|_| {
                StoreError::Corrupt {
                    height: expected as u64,
                    reason: "bad height key".into(),
                }
            })?);
            if height != expected as u64 {
                return Err(StoreError::Integrity {
                    height: expected as u64,
                    reason: format!("gap in stored heights (found {height})"),
                });
            }
            let block: Block = serde_json::from_slice(&value).map_err(|e| StoreError::Corrupt {
                height,
                reason: e.to_string(),
            })?;
            if block.height != height {
                return Err(StoreError::Integrity {
                    height,
                    reason: "stored block height disagrees with key".into(),
                });
            }
            blocks.push(block);
        }
        if !blocks.is_empty() {
            info!(height = blocks.len() - 1, "loaded active chain from store");
        }
        Ok(blocks)
    }

    /// Side blocks retained for audit.
    pub fn load_side(&self) -> Result<Vec<Block>, StoreError> {
        let mut blocks = Vec::new();
        for kv in self.side_blocks.iter() {
            let (_, value) = kv?;
            match serde_json::from_slice::<Block>(&value) {
                Ok(block) => blocks.push(block),
                Err(e) => warn!(error = %e, "skipping corrupt side block record"),
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{build_genesis, BlockBuilder};
    use lib_crypto::NodeKeypair;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip_active_chain() {
        let dir = tempdir().unwrap();
        let kp = NodeKeypair::generate().unwrap();
        let genesis = build_genesis(&kp.node_id());
        let b1 = BlockBuilder::new(genesis.hash(), 1).seal(&kp);

        {
            let db = ChainDb::open(dir.path()).unwrap();
            db.set_genesis_hash(&genesis.hash()).unwrap();
            db.put_active(&genesis).unwrap();
            db.put_active(&b1).unwrap();
        }

        let db = ChainDb::open(dir.path()).unwrap();
        assert_eq!(db.genesis_hash().unwrap().as_deref(), Some(genesis.hash().as_str()));
        let blocks = db.load_active().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].hash(), b1.hash());
    }

    #[test]
    fn test_height_gap_is_integrity_failure() {
        let dir = tempdir().unwrap();
        let kp = NodeKeypair::generate().unwrap();
        let genesis = build_genesis(&kp.node_id());
        let b2 = BlockBuilder::new(genesis.hash(), 2).seal(&kp);

        let db = ChainDb::open(dir.path()).unwrap();
        db.put_active(&genesis).unwrap();
        db.put_active(&b2).unwrap();
        assert!(matches!(db.load_active(), Err(StoreError::Integrity { height: 1, .. })));
    }

    #[test]
    fn test_rewrite_from_truncates_tail() {
        let dir = tempdir().unwrap();
        let kp = NodeKeypair::generate().unwrap();
        let genesis = build_genesis(&kp.node_id());
        let a1 = BlockBuilder::new(genesis.hash(), 1).seal(&kp);
        let b1 = BlockBuilder::new(genesis.hash(), 1).timestamp(7).seal(&kp);
        let b2 = BlockBuilder::new(b1.hash(), 2).timestamp(8).seal(&kp);

        let db = ChainDb::open(dir.path()).unwrap();
        db.put_active(&genesis).unwrap();
        db.put_active(&a1).unwrap();
        db.rewrite_from(0, &[b1.clone(), b2.clone()]).unwrap();

        let blocks = db.load_active().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].hash(), b1.hash());
        assert_eq!(blocks[2].hash(), b2.hash());
    }
}
