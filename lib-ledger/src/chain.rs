//! Chain state, block acceptance and reorg.
//!
//! The `Chain` owns every structurally valid block it has seen (active and
//! side chains), the ledger state folded from the active chain, and the
//! authority schedule. All mutation happens on the ledger worker task.
//!
//! Acceptance invariants:
//! - each accepted block links to its parent by hash (I1)
//! - the validator signature verifies and the validator is in the authority
//!   set known at the block's height (I2)
//! - every contained tx verifies its signature and balance/stake rules (I3)
//! - the merkle root commits to the tx set (I4)
//! - no liquid balance ever goes negative (I5)
//!
//! A side chain becomes active only when strictly longer and fully valid
//! under replay; ties keep the earliest-seen chain.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::merkle::merkle_root;
use crate::transaction::{GovernanceAction, Transaction, TxKind};
use crate::types::{AccountState, Address, TxId, SYSTEM_SENDER};
use crate::validation::{BlockError, TxError};

/// Authority set changes keyed by the height at which they take effect.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthoritySchedule {
    /// Ascending by effective height; each entry is the full set from that
    /// height onward.
    entries: Vec<(u64, BTreeSet<Address>)>,
}

impl AuthoritySchedule {
    pub fn genesis(designated_validator: Address) -> Self {
        let mut set = BTreeSet::new();
        set.insert(designated_validator);
        Self { entries: vec![(0, set)] }
    }

    /// The authority set in force at `height`.
    pub fn at(&self, height: u64) -> &BTreeSet<Address> {
        let idx = self
            .entries
            .partition_point(|(effective, _)| *effective <= height);
        // idx >= 1 because the genesis entry is at height 0
        &self.entries[idx.saturating_sub(1)].1
    }

    /// Schedule a mutation of the set effective at `effective_height`.
    fn schedule<F: FnOnce(&mut BTreeSet<Address>)>(&mut self, effective_height: u64, mutate: F) {
        let base = self.at(effective_height).clone();
        let idx = self
            .entries
            .partition_point(|(effective, _)| *effective <= effective_height);
        if idx > 0 && self.entries[idx - 1].0 == effective_height {
            mutate(&mut self.entries[idx - 1].1);
        } else {
            let mut set = base;
            mutate(&mut set);
            self.entries.insert(idx, (effective_height, set));
        }
    }
}

/// Balances, tx locations and authorities folded from the active chain.
#[derive(Debug, Clone)]
pub struct LedgerState {
    pub balances: HashMap<Address, AccountState>,
    pub tx_locations: HashMap<TxId, (u64, String)>,
    pub authorities: AuthoritySchedule,
    authority_latency: u64,
}

impl LedgerState {
    fn new(designated_validator: Address, authority_latency: u64) -> Self {
        Self {
            balances: HashMap::new(),
            tx_locations: HashMap::new(),
            authorities: AuthoritySchedule::genesis(designated_validator),
            authority_latency,
        }
    }

    pub fn balance(&self, address: &str) -> AccountState {
        self.balances.get(address).copied().unwrap_or_default()
    }

    /// Structural and signature checks that need no state.
    pub fn validate_tx_stateless(tx: &Transaction) -> Result<(), TxError> {
        if tx.id != tx.compute_id() {
            return Err(TxError::MalformedTx("id does not match body".into()));
        }
        if tx.kind.requires_amount() {
            match tx.amount {
                None => return Err(TxError::MalformedTx("missing amount".into())),
                Some(0) if matches!(tx.kind, TxKind::Transfer | TxKind::Stake) => {
                    return Err(TxError::MalformedTx("zero amount".into()))
                }
                _ => {}
            }
        }
        if tx.kind.requires_recipient() && tx.recipient.as_deref().unwrap_or("").is_empty() {
            return Err(TxError::MalformedTx("missing recipient".into()));
        }

        if tx.kind.is_system() {
            if tx.sender != SYSTEM_SENDER {
                return Err(TxError::MalformedTx("system tx with non-system sender".into()));
            }
            if tx.signature.is_some() {
                return Err(TxError::MalformedTx("system tx must not be signed".into()));
            }
        } else {
            if tx.sender == SYSTEM_SENDER {
                return Err(TxError::MalformedTx("non-system kind with system sender".into()));
            }
            if hex::decode(&tx.sender).map(|b| b.len()) != Ok(32) {
                return Err(TxError::MalformedTx("sender is not a public key".into()));
            }
            let Some(signature) = &tx.signature else {
                return Err(TxError::InvalidSignature);
            };
            if !lib_crypto::verify_signature(&tx.sender, &tx.signing_bytes(), signature) {
                return Err(TxError::InvalidSignature);
            }
        }

        match tx.kind {
            TxKind::Governance => {
                if tx.governance_action().is_none() {
                    return Err(TxError::MalformedTx("unparseable governance action".into()));
                }
            }
            TxKind::DecisionRecord => {
                if tx.payload.get("proposal_id").and_then(Value::as_str).is_none() {
                    return Err(TxError::MalformedTx("decision record without proposal_id".into()));
                }
            }
            TxKind::Slash => {
                if tx.recipient.as_deref().unwrap_or("").is_empty() {
                    return Err(TxError::MalformedTx("slash without target".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Balance, duplication and authority checks against this state.
    ///
    /// `at_height` is the height the tx would be sealed at.
    pub fn validate_tx(&self, tx: &Transaction, at_height: u64) -> Result<(), TxError> {
        if self.tx_locations.contains_key(&tx.id) {
            return Err(TxError::DuplicateTx(tx.id.clone()));
        }
        match tx.kind {
            TxKind::Transfer | TxKind::Stake => {
                let have = self.balance(&tx.sender).liquid;
                let need = tx.amount.unwrap_or(0);
                if have < need {
                    return Err(TxError::InsufficientFunds { have, need });
                }
            }
            TxKind::Governance => {
                let action = tx
                    .governance_action()
                    .ok_or_else(|| TxError::MalformedTx("unparseable governance action".into()))?;
                let self_evident = match &action {
                    GovernanceAction::RemoveAuthority {
                        pubkey,
                        evidence: Some(evidence),
                    } => evidence.validator == *pubkey && evidence.verify(),
                    _ => false,
                };
                if !self_evident && !self.authorities.at(at_height).contains(&tx.sender) {
                    return Err(TxError::NotAuthority);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply a validated transaction. Panics are impossible by construction;
    /// balance math saturates.
    fn apply_tx(&mut self, tx: &Transaction, height: u64, block_hash: &str) {
        let amount = tx.amount.unwrap_or(0);
        match tx.kind {
            TxKind::MintReward => {
                if let Some(recipient) = &tx.recipient {
                    self.balances.entry(recipient.clone()).or_default().liquid += amount;
                }
            }
            TxKind::Transfer => {
                if let Some(recipient) = &tx.recipient {
                    let sender = self.balances.entry(tx.sender.clone()).or_default();
                    sender.liquid = sender.liquid.saturating_sub(amount);
                    self.balances.entry(recipient.clone()).or_default().liquid += amount;
                }
            }
            TxKind::Stake => {
                let account = self.balances.entry(tx.sender.clone()).or_default();
                account.liquid = account.liquid.saturating_sub(amount);
                account.staked += amount;
            }
            TxKind::Slash => {
                if let Some(target) = &tx.recipient {
                    let account = self.balances.entry(target.clone()).or_default();
                    account.staked = account.staked.saturating_sub(amount);
                }
            }
            TxKind::Governance => {
                let effective = height + self.authority_latency;
                match tx.governance_action() {
                    Some(GovernanceAction::AddAuthority { pubkey }) => {
                        self.authorities.schedule(effective, |set| {
                            set.insert(pubkey);
                        });
                    }
                    Some(GovernanceAction::RemoveAuthority { pubkey, .. }) => {
                        self.authorities.schedule(effective, |set| {
                            set.remove(&pubkey);
                        });
                    }
                    // SetParam is applied by the ledger worker against the
                    // governance store, not against chain state.
                    Some(GovernanceAction::SetParam { .. }) | None => {}
                }
            }
            TxKind::DecisionRecord | TxKind::KnowledgeIngest => {}
        }
        self.tx_locations
            .insert(tx.id.clone(), (height, block_hash.to_string()));
    }

    /// Apply a tx while staging a block proposal; the sealing block hash is
    /// not known yet.
    pub(crate) fn apply_for_staging(&mut self, tx: &Transaction, height: u64) {
        self.apply_tx(tx, height, "");
    }

    /// Validate and apply every transaction of a block.
    fn apply_block(&mut self, block: &Block) -> Result<(), BlockError> {
        let block_hash = block.hash();
        for tx in &block.transactions {
            // Genesis carries the supply mint; it is system-built, but still
            // goes through the same checks.
            Self::validate_tx_stateless(tx).map_err(|source| BlockError::InvalidTx {
                tx_id: tx.id.clone(),
                source,
            })?;
            self.validate_tx(tx, block.height)
                .map_err(|source| match source {
                    TxError::DuplicateTx(tx_id) => BlockError::DuplicateTx { tx_id },
                    source => BlockError::InvalidTx {
                        tx_id: tx.id.clone(),
                        source,
                    },
                })?;
            self.apply_tx(tx, block.height, &block_hash);
        }
        Ok(())
    }
}

/// Outcome of [`Chain::accept_block`].
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptResult {
    /// The block extended the active chain.
    Extends { height: u64 },
    /// The block extended a side chain forking from the given height.
    ExtendsSide { fork_height: u64 },
    /// The block was already known.
    AlreadyKnown,
}

/// Outcome of a successful reorganization.
#[derive(Debug, Clone)]
pub struct ReorgInfo {
    pub old_height: u64,
    pub new_height: u64,
    pub fork_height: u64,
    pub new_tip: String,
    /// Transactions from orphaned blocks, candidates for requeueing.
    pub orphaned_txs: Vec<Transaction>,
}

/// The block tree plus active-chain state.
pub struct Chain {
    genesis_hash: String,
    designated_validator: Address,
    blocks: HashMap<String, Block>,
    children: HashMap<String, Vec<String>>,
    arrival: HashMap<String, u64>,
    next_seq: u64,
    /// Active chain block hashes, index = height.
    active: Vec<String>,
    state: LedgerState,
    invalid: HashSet<String>,
    authority_latency: u64,
    max_tx_per_block: usize,
}

impl Chain {
    /// Initialize from the deterministic genesis block.
    pub fn new(genesis: Block, authority_latency: u64, max_tx_per_block: usize) -> Result<Self, BlockError> {
        let genesis_hash = genesis.hash();
        let designated_validator = genesis.validator.clone();
        let mut state = LedgerState::new(designated_validator.clone(), authority_latency);
        state.apply_block(&genesis)?;

        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash.clone(), genesis);
        Ok(Self {
            genesis_hash: genesis_hash.clone(),
            designated_validator,
            blocks,
            children: HashMap::new(),
            arrival: HashMap::from([(genesis_hash.clone(), 0)]),
            next_seq: 1,
            active: vec![genesis_hash],
            state,
            invalid: HashSet::new(),
            authority_latency,
            max_tx_per_block,
        })
    }

    pub fn genesis_hash(&self) -> &str {
        &self.genesis_hash
    }

    pub fn height(&self) -> u64 {
        (self.active.len() - 1) as u64
    }

    pub fn tip_hash(&self) -> &str {
        self.active.last().expect("active chain is never empty")
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn get_block(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    /// Block at `height` on the active chain.
    pub fn get_active(&self, height: u64) -> Option<&Block> {
        self.active
            .get(height as usize)
            .and_then(|hash| self.blocks.get(hash))
    }

    /// Active chain blocks, ascending by height.
    pub fn active_blocks(&self) -> impl Iterator<Item = &Block> {
        self.active.iter().filter_map(|hash| self.blocks.get(hash))
    }

    pub fn set_max_tx_per_block(&mut self, max: usize) {
        self.max_tx_per_block = max.max(1);
    }

    /// Accept a block into the tree.
    ///
    /// Blocks extending the active tip are fully validated and applied.
    /// Blocks extending side chains are structurally validated and retained;
    /// full validation happens if their branch becomes a reorg candidate.
    pub fn accept_block(&mut self, block: Block) -> Result<AcceptResult, BlockError> {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return Ok(AcceptResult::AlreadyKnown);
        }
        if block.height == 0 {
            return Err(BlockError::GenesisMismatch);
        }
        if self.invalid.contains(&block.prev_hash) {
            return Err(BlockError::ExtendsInvalid);
        }

        let parent = self
            .blocks
            .get(&block.prev_hash)
            .ok_or_else(|| BlockError::UnknownParent(block.prev_hash.clone()))?;
        if block.height != parent.height + 1 {
            return Err(BlockError::HeightGap {
                expected: parent.height + 1,
                actual: block.height,
            });
        }
        if block.timestamp < parent.timestamp {
            return Err(BlockError::TimestampBeforeParent);
        }
        if block.transactions.len() > self.max_tx_per_block {
            return Err(BlockError::TooManyTransactions {
                count: block.transactions.len(),
                max: self.max_tx_per_block,
            });
        }
        let ids = block.tx_ids();
        if merkle_root(&ids) != block.merkle_root {
            return Err(BlockError::MerkleMismatch);
        }
        if !block.verify_signature() {
            return Err(BlockError::BadSignature);
        }
        for tx in &block.transactions {
            LedgerState::validate_tx_stateless(tx).map_err(|source| BlockError::InvalidTx {
                tx_id: tx.id.clone(),
                source,
            })?;
        }

        let extends_tip = block.prev_hash == *self.tip_hash();
        let prev_hash = block.prev_hash.clone();
        let height = block.height;

        if extends_tip {
            if !self.state.authorities.at(height).contains(&block.validator) {
                return Err(BlockError::StaleAuthority {
                    pubkey: block.validator.clone(),
                    height,
                });
            }
            let mut next_state = self.state.clone();
            next_state.apply_block(&block)?;

            self.record_block(hash.clone(), prev_hash, block);
            self.state = next_state;
            self.active.push(hash);
            debug!(height, "block extended active chain");
            Ok(AcceptResult::Extends { height })
        } else {
            let fork_height = self.fork_height_of(&prev_hash);
            self.record_block(hash, prev_hash, block);
            debug!(height, fork_height, "block recorded on side chain");
            Ok(AcceptResult::ExtendsSide { fork_height })
        }
    }

    fn record_block(&mut self, hash: String, prev_hash: String, block: Block) {
        self.children.entry(prev_hash).or_default().push(hash.clone());
        self.arrival.insert(hash.clone(), self.next_seq);
        self.next_seq += 1;
        self.blocks.insert(hash, block);
    }

    /// Height of the nearest ancestor of `hash` on the active chain.
    fn fork_height_of(&self, hash: &str) -> u64 {
        let active_set: HashSet<&str> = self.active.iter().map(|h| h.as_str()).collect();
        let mut current = hash;
        loop {
            if active_set.contains(current) {
                return self
                    .blocks
                    .get(current)
                    .map(|b| b.height)
                    .unwrap_or(0);
            }
            match self.blocks.get(current) {
                Some(block) => current = &block.prev_hash,
                None => return 0,
            }
        }
    }

    /// Path of hashes from genesis to `leaf`, or None if the chain is broken.
    fn path_to(&self, leaf: &str) -> Option<Vec<String>> {
        let mut path = Vec::new();
        let mut current = leaf.to_string();
        loop {
            let block = self.blocks.get(&current)?;
            path.push(current.clone());
            if block.height == 0 {
                break;
            }
            current = block.prev_hash.clone();
        }
        path.reverse();
        if path.first().map(String::as_str) == Some(self.genesis_hash.as_str()) {
            Some(path)
        } else {
            None
        }
    }

    /// Fully re-validate a candidate chain, returning its terminal state.
    fn replay(&self, path: &[String]) -> Result<LedgerState, BlockError> {
        let mut state = LedgerState::new(self.designated_validator.clone(), self.authority_latency);
        for (idx, hash) in path.iter().enumerate() {
            let block = self
                .blocks
                .get(hash)
                .ok_or_else(|| BlockError::UnknownParent(hash.clone()))?;
            if idx > 0 {
                if !state.authorities.at(block.height).contains(&block.validator) {
                    return Err(BlockError::StaleAuthority {
                        pubkey: block.validator.clone(),
                        height: block.height,
                    });
                }
                if !block.verify_signature() {
                    return Err(BlockError::BadSignature);
                }
            }
            state.apply_block(block)?;
        }
        Ok(state)
    }

    /// Switch to the longest fully valid side chain, if one strictly exceeds
    /// the active height. Ties keep the earliest-seen (current) chain.
    pub fn maybe_reorg(&mut self) -> Option<ReorgInfo> {
        let active_set: HashSet<String> = self.active.iter().cloned().collect();
        let mut candidates: Vec<(String, u64)> = self
            .blocks
            .iter()
            .filter(|(hash, _)| {
                !active_set.contains(*hash)
                    && !self.invalid.contains(*hash)
                    && self.children.get(*hash).map_or(true, Vec::is_empty)
            })
            .map(|(hash, block)| (hash.clone(), block.height))
            .filter(|(_, height)| *height > self.height())
            .collect();
        candidates.sort_by_key(|(hash, height)| {
            (std::cmp::Reverse(*height), self.arrival.get(hash).copied().unwrap_or(u64::MAX))
        });

        for (leaf, leaf_height) in candidates {
            let Some(path) = self.path_to(&leaf) else {
                continue;
            };
            match self.replay(&path) {
                Ok(new_state) => {
                    let old_height = self.height();
                    let fork_height = path
                        .iter()
                        .zip(self.active.iter())
                        .take_while(|(a, b)| a == b)
                        .count() as u64
                        - 1;

                    let new_path_ids: HashSet<&str> = path
                        .iter()
                        .filter_map(|h| self.blocks.get(h))
                        .flat_map(|b| b.transactions.iter().map(|tx| tx.id.as_str()))
                        .collect();
                    let orphaned_txs: Vec<Transaction> = self.active[(fork_height as usize + 1)..]
                        .iter()
                        .filter_map(|h| self.blocks.get(h))
                        .flat_map(|b| b.transactions.iter())
                        .filter(|tx| !new_path_ids.contains(tx.id.as_str()))
                        .cloned()
                        .collect();

                    info!(
                        old_height,
                        new_height = leaf_height,
                        fork_height,
                        orphaned = orphaned_txs.len(),
                        "reorganizing to longer valid chain"
                    );
                    self.active = path;
                    self.state = new_state;
                    return Some(ReorgInfo {
                        old_height,
                        new_height: leaf_height,
                        fork_height,
                        new_tip: leaf,
                        orphaned_txs,
                    });
                }
                Err(e) => {
                    warn!(leaf = %leaf, error = %e, "side chain failed validation, marking invalid");
                    self.invalid.insert(leaf);
                }
            }
        }
        None
    }
}
