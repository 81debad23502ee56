//! Double-sign evidence.
//!
//! A validator that seals two distinct blocks at the same height is slashed
//! immediately and scheduled for removal from the authority set. Evidence is
//! two independently verifiable signed headers and travels inside a
//! `governance` transaction so every node applies the removal at the same
//! height.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::block::SignedHeader;
use crate::types::Address;

/// Proof that `validator` sealed two conflicting blocks at `height`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleSignEvidence {
    pub validator: Address,
    pub height: u64,
    pub first: SignedHeader,
    pub second: SignedHeader,
}

impl DoubleSignEvidence {
    /// Check the evidence stands on its own: same validator and height,
    /// distinct hashes, both seals valid.
    pub fn verify(&self) -> bool {
        self.first.validator == self.validator
            && self.second.validator == self.validator
            && self.first.height == self.height
            && self.second.height == self.height
            && self.first.hash() != self.second.hash()
            && self.first.verify()
            && self.second.verify()
    }
}

/// Tracks which (height, validator) pairs have been observed sealed, and by
/// which block, to detect equivocation.
#[derive(Debug, Default)]
pub struct DoubleSignRegistry {
    seen: HashMap<(u64, Address), SignedHeader>,
    reported: HashMap<(u64, Address), ()>,
}

impl DoubleSignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed sealed header. Returns evidence the first time a
    /// conflicting seal is seen for the same (height, validator) pair.
    pub fn observe(&mut self, header: SignedHeader) -> Option<DoubleSignEvidence> {
        let key = (header.height, header.validator.clone());
        match self.seen.get(&key) {
            None => {
                self.seen.insert(key, header);
                None
            }
            Some(existing) if existing.hash() == header.hash() => None,
            Some(existing) => {
                if self.reported.contains_key(&key) {
                    return None;
                }
                self.reported.insert(key.clone(), ());
                Some(DoubleSignEvidence {
                    validator: header.validator.clone(),
                    height: header.height,
                    first: existing.clone(),
                    second: header,
                })
            }
        }
    }
}
