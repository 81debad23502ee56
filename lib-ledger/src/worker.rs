//! The ledger worker: single mutator of chain and mempool state.
//!
//! Peers, the API and the deliberation engine submit requests over a bounded
//! channel and await the reply. Reads go through an atomically swapped
//! snapshot pointer, refreshed after every mutation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use lib_crypto::NodeKeypair;
use lib_governance::GovernanceStore;
use tokio::sync::broadcast;

use crate::block::{build_genesis, Block, BlockBuilder};
use crate::chain::{AcceptResult, Chain, LedgerState};
use crate::events::LedgerEvent;
use crate::evidence::DoubleSignRegistry;
use crate::mempool::Mempool;
use crate::store::{ChainDb, StoreError};
use crate::transaction::{GovernanceAction, Transaction, TxKind};
use crate::types::{AccountState, Address, TxId};
use crate::validation::{BlockError, TxError};
use crate::wallet::WalletView;

/// Commands accepted by the worker.
enum LedgerCommand {
    SubmitTx {
        tx: Transaction,
        internal: bool,
        reply: oneshot::Sender<Result<(), TxError>>,
    },
    ProposeBlock {
        reply: oneshot::Sender<Result<Option<Block>, BlockError>>,
    },
    AcceptBlock {
        block: Block,
        reply: oneshot::Sender<Result<AcceptResult, BlockError>>,
    },
}

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Immutable chain view published after every mutation.
pub struct ChainSnapshot {
    pub height: u64,
    pub tip_hash: String,
    pub genesis_hash: String,
    pub mempool_len: usize,
    blocks: Vec<Arc<Block>>,
    tx_index: HashMap<TxId, (u64, usize)>,
    balances: HashMap<Address, AccountState>,
    authorities: BTreeSet<Address>,
}

impl ChainSnapshot {
    fn build(chain: &Chain, mempool_len: usize) -> Self {
        let blocks: Vec<Arc<Block>> = chain.active_blocks().cloned().map(Arc::new).collect();
        let mut tx_index = HashMap::new();
        for block in &blocks {
            for (idx, tx) in block.transactions.iter().enumerate() {
                tx_index.insert(tx.id.clone(), (block.height, idx));
            }
        }
        Self {
            height: chain.height(),
            tip_hash: chain.tip_hash().to_string(),
            genesis_hash: chain.genesis_hash().to_string(),
            mempool_len,
            tx_index,
            balances: chain.state().balances.clone(),
            authorities: chain.state().authorities.at(chain.height()).clone(),
            blocks,
        }
    }

    pub fn head(&self) -> (u64, &str) {
        (self.height, &self.tip_hash)
    }

    /// Page of blocks, descending by height.
    pub fn blocks_desc(&self, offset: usize, limit: usize) -> Vec<Arc<Block>> {
        self.blocks
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Blocks from `from_height` ascending, for chain sync.
    pub fn blocks_from(&self, from_height: u64, limit: usize) -> Vec<Arc<Block>> {
        self.blocks
            .iter()
            .skip(from_height as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up a canonical transaction with its sealing height.
    pub fn get_tx(&self, id: &str) -> Option<(Transaction, u64)> {
        let (height, idx) = self.tx_index.get(id)?;
        let block = self.blocks.get(*height as usize)?;
        block.transactions.get(*idx).map(|tx| (tx.clone(), *height))
    }

    /// Page of canonical transactions, newest block first.
    pub fn txs_desc(&self, offset: usize, limit: usize) -> Vec<(Transaction, u64)> {
        self.blocks
            .iter()
            .rev()
            .flat_map(|b| b.transactions.iter().map(move |tx| (tx.clone(), b.height)))
            .skip(offset)
            .take(limit)
            .collect()
    }

    pub fn wallet(&self, address: &str) -> WalletView {
        let account = self.balances.get(address).copied().unwrap_or_default();
        WalletView {
            address: address.to_string(),
            liquid_balance: account.liquid,
            staked_balance: account.staked,
            is_validator: self.authorities.contains(address),
        }
    }

    pub fn is_authority(&self, address: &str) -> bool {
        self.authorities.contains(address)
    }
}

type SnapshotCell = Arc<RwLock<Arc<ChainSnapshot>>>;

/// Cloneable handle for submitting requests and reading snapshots.
#[derive(Clone)]
pub struct LedgerHandle {
    cmd_tx: mpsc::Sender<LedgerCommand>,
    snapshot: SnapshotCell,
}

impl LedgerHandle {
    /// Validate and enqueue an externally submitted transaction.
    pub async fn submit_tx(&self, tx: Transaction) -> Result<(), TxError> {
        self.submit(tx, false).await
    }

    /// Enqueue a transaction from a trusted local flow (deliberation
    /// terminal actions, double-sign evidence). System kinds are only
    /// accepted here.
    pub async fn submit_internal(&self, tx: Transaction) -> Result<(), TxError> {
        self.submit(tx, true).await
    }

    async fn submit(&self, tx: Transaction, internal: bool) -> Result<(), TxError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(LedgerCommand::SubmitTx { tx, internal, reply })
            .await
            .map_err(|_| TxError::WorkerUnavailable)?;
        rx.await.map_err(|_| TxError::WorkerUnavailable)?
    }

    /// Seal the next block from the mempool, if this node is an authority
    /// and the mempool is non-empty.
    pub async fn propose_block(&self) -> Result<Option<Block>, BlockError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(LedgerCommand::ProposeBlock { reply })
            .await
            .map_err(|_| BlockError::WorkerUnavailable)?;
        rx.await.map_err(|_| BlockError::WorkerUnavailable)?
    }

    /// Run a received block through validation and chain acceptance.
    pub async fn accept_block(&self, block: Block) -> Result<AcceptResult, BlockError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(LedgerCommand::AcceptBlock { block, reply })
            .await
            .map_err(|_| BlockError::WorkerUnavailable)?;
        rx.await.map_err(|_| BlockError::WorkerUnavailable)?
    }

    /// Current chain snapshot (lock held only for the pointer clone).
    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        self.snapshot.read().clone()
    }
}

/// The single-mutator worker task.
pub struct LedgerWorker {
    chain: Chain,
    mempool: Mempool,
    db: Option<ChainDb>,
    governance: GovernanceStore,
    events: broadcast::Sender<LedgerEvent>,
    keypair: Arc<NodeKeypair>,
    evidence: DoubleSignRegistry,
    cmd_rx: mpsc::Receiver<LedgerCommand>,
    snapshot: SnapshotCell,
}

impl LedgerWorker {
    /// Build a worker over an existing store, replaying persisted blocks.
    ///
    /// Fails with [`StoreError::Integrity`] when the persisted chain breaks
    /// any invariant; callers must treat that as fatal.
    pub fn bootstrap(
        db: Option<ChainDb>,
        designated_validator: Address,
        governance: GovernanceStore,
        events: broadcast::Sender<LedgerEvent>,
        keypair: Arc<NodeKeypair>,
    ) -> Result<(Self, LedgerHandle), StoreError> {
        let params = governance.snapshot();
        let genesis = build_genesis(&designated_validator);

        let mut chain = Chain::new(genesis.clone(), params.authority_latency, params.max_tx_per_block)
            .map_err(|e| StoreError::Integrity {
                height: 0,
                reason: e.to_string(),
            })?;

        if let Some(db) = &db {
            match db.genesis_hash()? {
                Some(stored) if stored != genesis.hash() => {
                    return Err(StoreError::Integrity {
                        height: 0,
                        reason: "stored genesis disagrees with configured validator".into(),
                    });
                }
                Some(_) => {
                    let blocks = db.load_active()?;
                    if blocks.is_empty() {
                        db.put_active(&genesis)?;
                    }
                    for block in blocks.into_iter().skip(1) {
                        let height = block.height;
                        chain.accept_block(block).map_err(|e| StoreError::Integrity {
                            height,
                            reason: e.to_string(),
                        })?;
                    }
                    for block in db.load_side()? {
                        // Side blocks are best-effort audit data.
                        let _ = chain.accept_block(block);
                    }
                    governance.apply_due(chain.height());
                }
                None => {
                    db.set_genesis_hash(&genesis.hash())?;
                    db.put_active(&genesis)?;
                }
            }
        }

        let mempool = Mempool::new(params.max_mempool);
        let snapshot: SnapshotCell = Arc::new(RwLock::new(Arc::new(ChainSnapshot::build(
            &chain,
            mempool.len(),
        ))));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let handle = LedgerHandle {
            cmd_tx,
            snapshot: snapshot.clone(),
        };
        let worker = Self {
            chain,
            mempool,
            db,
            governance,
            events,
            keypair,
            evidence: DoubleSignRegistry::new(),
            cmd_rx,
            snapshot,
        };
        Ok((worker, handle))
    }

    /// Drive the worker until every handle is dropped.
    pub async fn run(mut self) {
        info!(height = self.chain.height(), "ledger worker started");
        while let Some(command) = self.cmd_rx.recv().await {
            match command {
                LedgerCommand::SubmitTx { tx, internal, reply } => {
                    let result = self.handle_submit(tx, internal);
                    let _ = reply.send(result);
                }
                LedgerCommand::ProposeBlock { reply } => {
                    let result = self.handle_propose();
                    let _ = reply.send(result);
                }
                LedgerCommand::AcceptBlock { block, reply } => {
                    let result = self.handle_accept(block);
                    let _ = reply.send(result);
                }
            }
            self.publish_snapshot();
        }
        info!("ledger worker stopped");
    }

    fn publish_snapshot(&self) {
        let snapshot = Arc::new(ChainSnapshot::build(&self.chain, self.mempool.len()));
        *self.snapshot.write() = snapshot;
    }

    fn handle_submit(&mut self, tx: Transaction, internal: bool) -> Result<(), TxError> {
        if tx.kind.is_system() && !internal {
            return Err(TxError::MalformedTx("system txs cannot be submitted externally".into()));
        }
        LedgerState::validate_tx_stateless(&tx)?;
        if self.mempool.contains(&tx.id) {
            return Err(TxError::DuplicateTx(tx.id));
        }
        self.chain.state().validate_tx(&tx, self.chain.height() + 1)?;
        self.mempool.push(tx)
    }

    fn handle_propose(&mut self) -> Result<Option<Block>, BlockError> {
        let next_height = self.chain.height() + 1;
        let own_id = self.keypair.node_id();
        if !self.chain.state().authorities.at(next_height).contains(&own_id) {
            return Err(BlockError::StaleAuthority {
                pubkey: own_id,
                height: next_height,
            });
        }
        if self.mempool.is_empty() {
            return Ok(None);
        }

        let params = self.governance.snapshot();
        let candidates = self.mempool.take(params.max_tx_per_block);
        let mut included = Vec::new();
        let mut staging = self.chain.state().clone();
        for tx in candidates {
            match staging.validate_tx(&tx, next_height) {
                Ok(()) => {
                    staging.apply_for_staging(&tx, next_height);
                    included.push(tx);
                }
                Err(e) => {
                    warn!(tx_id = %tx.id, error = %e, "dropping stale mempool tx at seal time");
                }
            }
        }
        if included.is_empty() {
            return Ok(None);
        }

        let block = BlockBuilder::new(self.chain.tip_hash().to_string(), next_height)
            .transactions(included)
            .seal(&self.keypair);
        match self.handle_accept(block.clone())? {
            AcceptResult::Extends { height } => {
                info!(height, txs = block.transactions.len(), "sealed block");
                Ok(Some(block))
            }
            other => {
                error!(?other, "self-sealed block failed to extend the active chain");
                Ok(None)
            }
        }
    }

    fn handle_accept(&mut self, block: Block) -> Result<AcceptResult, BlockError> {
        let header = block.header();
        let result = self.chain.accept_block(block.clone());

        // Evidence runs even for rejected blocks: a structurally valid seal
        // at a height is an equivocation candidate regardless of tx validity.
        if header.verify() {
            if let Some(evidence) = self.evidence.observe(header) {
                self.report_double_sign(evidence);
            }
        }

        let result = result?;
        match &result {
            AcceptResult::Extends { .. } => {
                self.after_canonical_extension(&block);
            }
            AcceptResult::ExtendsSide { .. } => {
                if let Some(db) = &self.db {
                    if let Err(e) = db.put_side(&block) {
                        warn!(error = %e, "failed to persist side block");
                    }
                }
                self.try_reorg();
            }
            AcceptResult::AlreadyKnown => {}
        }
        Ok(result)
    }

    /// Persistence, mempool cleanup, governance and events for a block that
    /// joined the active chain.
    fn after_canonical_extension(&mut self, block: &Block) {
        if let Some(db) = &self.db {
            if let Err(e) = db.put_active(block) {
                error!(error = %e, height = block.height, "failed to persist block");
            }
        }
        self.mempool
            .remove_sealed(block.transactions.iter().map(|tx| tx.id.as_str()));
        self.scan_governance(block);
        self.governance.apply_due(self.chain.height());
        self.emit_block_events(block);
    }

    fn emit_block_events(&self, block: &Block) {
        let _ = self.events.send(LedgerEvent::Block {
            height: block.height,
            hash: block.hash(),
        });
        for tx in &block.transactions {
            let _ = self.events.send(LedgerEvent::Tx {
                id: tx.id.clone(),
                kind: tx.kind,
            });
        }
    }

    /// Schedule `set_param` actions from a canonical block.
    fn scan_governance(&self, block: &Block) {
        let params = self.governance.snapshot();
        for tx in &block.transactions {
            if let Some(GovernanceAction::SetParam { name, value }) = tx.governance_action() {
                let effective = block.height + params.authority_latency;
                if let Err(e) = self.governance.schedule_update(&name, value, effective) {
                    warn!(param = %name, error = %e, "sealed governance update is invalid");
                }
            }
        }
    }

    fn try_reorg(&mut self) {
        let Some(reorg) = self.chain.maybe_reorg() else {
            return;
        };

        if let Some(db) = &self.db {
            // Retain the orphaned tail for audit, then rewrite the
            // canonical tail.
            let new_tail: Vec<Block> = ((reorg.fork_height + 1)..=self.chain.height())
                .filter_map(|h| self.chain.get_active(h).cloned())
                .collect();
            for block in db.load_active().unwrap_or_default() {
                if block.height > reorg.fork_height {
                    if let Err(e) = db.put_side(&block) {
                        warn!(error = %e, "failed to retain orphaned block");
                    }
                }
            }
            if let Err(e) = db.rewrite_from(reorg.fork_height, &new_tail) {
                error!(error = %e, "failed to persist reorged chain");
            }
        }

        // Scheduled governance from unwound blocks is void; rescan the new tail.
        self.governance.discard_above(reorg.fork_height);
        let new_blocks: Vec<Block> = ((reorg.fork_height + 1)..=self.chain.height())
            .filter_map(|h| self.chain.get_active(h).cloned())
            .collect();
        for block in &new_blocks {
            self.scan_governance(block);
        }
        self.governance.apply_due(self.chain.height());

        // Orphaned txs return to the mempool iff still valid under the new
        // state; the rest are dropped.
        let mut requeued = 0usize;
        for tx in reorg.orphaned_txs {
            if LedgerState::validate_tx_stateless(&tx).is_ok()
                && self
                    .chain
                    .state()
                    .validate_tx(&tx, self.chain.height() + 1)
                    .is_ok()
                && self.mempool.push(tx).is_ok()
            {
                requeued += 1;
            }
        }
        info!(
            new_height = reorg.new_height,
            requeued, "reorg complete, mempool requeued"
        );

        let _ = self.events.send(LedgerEvent::Reorg {
            old_height: reorg.old_height,
            new_height: reorg.new_height,
            fork_height: reorg.fork_height,
        });
        if let Some(tip) = self.chain.get_active(self.chain.height()) {
            let _ = self.events.send(LedgerEvent::Block {
                height: tip.height,
                hash: tip.hash(),
            });
        }
    }

    /// Slash a double-signer and schedule its removal from the authority set.
    fn report_double_sign(&mut self, evidence: crate::evidence::DoubleSignEvidence) {
        warn!(
            validator = %evidence.validator,
            height = evidence.height,
            "double-sign detected, slashing"
        );
        let staked = self.chain.state().balance(&evidence.validator).staked;
        let slash = Transaction::system(
            TxKind::Slash,
            Some(evidence.validator.clone()),
            Some(staked),
            json!({
                "reason": "double_sign",
                "height": evidence.height,
                "first": evidence.first.hash(),
                "second": evidence.second.hash(),
            }),
        );
        let removal = Transaction::signed(
            &self.keypair,
            TxKind::Governance,
            None,
            None,
            serde_json::to_value(GovernanceAction::RemoveAuthority {
                pubkey: evidence.validator.clone(),
                evidence: Some(evidence),
            })
            .unwrap_or_default(),
        );
        for tx in [slash, removal] {
            let kind = tx.kind;
            if let Err(e) = self.handle_submit(tx, true) {
                warn!(%kind, error = %e, "failed to enqueue double-sign response tx");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockBuilder;
    use crate::types::TREASURY_ADDRESS;

    fn spawn_worker(
        keypair: Arc<NodeKeypair>,
        designated: Address,
    ) -> (LedgerHandle, broadcast::Receiver<LedgerEvent>) {
        let governance = GovernanceStore::new_default();
        let (events_tx, events_rx) = crate::events::channel();
        let (worker, handle) =
            LedgerWorker::bootstrap(None, designated, governance, events_tx, keypair).unwrap();
        tokio::spawn(worker.run());
        (handle, events_rx)
    }

    fn transfer(from: &NodeKeypair, to: &str, amount: u64) -> Transaction {
        Transaction::signed(from, TxKind::Transfer, Some(to.to_string()), Some(amount), json!({}))
    }

    #[tokio::test]
    async fn test_submit_propose_and_read_back() {
        let kp = Arc::new(NodeKeypair::generate().unwrap());
        let (handle, _events) = spawn_worker(kp.clone(), kp.node_id());

        let mint = Transaction::system(TxKind::MintReward, Some("alice".into()), Some(10), json!({}));
        handle.submit_internal(mint.clone()).await.unwrap();

        let block = handle.propose_block().await.unwrap().expect("a block");
        assert_eq!(block.height, 1);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.height, 1);
        assert_eq!(snapshot.wallet("alice").liquid_balance, 10);
        let (found, height) = snapshot.get_tx(&mint.id).expect("sealed tx");
        assert_eq!(found.id, mint.id);
        assert_eq!(height, 1);
    }

    #[tokio::test]
    async fn test_external_system_tx_rejected() {
        let kp = Arc::new(NodeKeypair::generate().unwrap());
        let (handle, _events) = spawn_worker(kp.clone(), kp.node_id());
        let mint = Transaction::system(TxKind::MintReward, Some("x".into()), Some(1), json!({}));
        assert!(matches!(
            handle.submit_tx(mint).await,
            Err(TxError::MalformedTx(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_funds_surface() {
        let kp = Arc::new(NodeKeypair::generate().unwrap());
        let user = NodeKeypair::generate().unwrap();
        let (handle, _events) = spawn_worker(kp.clone(), kp.node_id());
        assert!(matches!(
            handle.submit_tx(transfer(&user, "bob", 5)).await,
            Err(TxError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_block_events_emitted() {
        let kp = Arc::new(NodeKeypair::generate().unwrap());
        let (handle, mut events) = spawn_worker(kp.clone(), kp.node_id());

        let mint = Transaction::system(TxKind::MintReward, Some("alice".into()), Some(3), json!({}));
        handle.submit_internal(mint).await.unwrap();
        handle.propose_block().await.unwrap().expect("a block");

        let first = events.recv().await.unwrap();
        assert!(matches!(first, LedgerEvent::Block { height: 1, .. }));
        let second = events.recv().await.unwrap();
        assert!(matches!(second, LedgerEvent::Tx { .. }));
    }

    #[tokio::test]
    async fn test_non_authority_cannot_propose() {
        let kp = Arc::new(NodeKeypair::generate().unwrap());
        let other = NodeKeypair::generate().unwrap();
        // designated validator differs from our key
        let (handle, _events) = spawn_worker(kp.clone(), other.node_id());
        assert!(matches!(
            handle.propose_block().await,
            Err(BlockError::StaleAuthority { .. })
        ));
    }

    #[tokio::test]
    async fn test_accept_foreign_block_and_reorg_events() {
        let validator = Arc::new(NodeKeypair::generate().unwrap());
        let (handle, mut events) = spawn_worker(validator.clone(), validator.node_id());
        let genesis_hash = handle.snapshot().genesis_hash.clone();

        // a1 extends genesis locally
        let a1 = BlockBuilder::new(genesis_hash.clone(), 1)
            .transactions(vec![Transaction::system(
                TxKind::MintReward,
                Some("a".into()),
                Some(1),
                json!({"n": 1}),
            )])
            .seal(&validator);
        assert!(matches!(
            handle.accept_block(a1).await.unwrap(),
            AcceptResult::Extends { height: 1 }
        ));

        // competing longer fork b1..b2
        let b1 = BlockBuilder::new(genesis_hash, 1)
            .transactions(vec![Transaction::system(
                TxKind::MintReward,
                Some("b".into()),
                Some(2),
                json!({"n": 2}),
            )])
            .seal(&validator);
        let b1_hash = b1.hash();
        assert!(matches!(
            handle.accept_block(b1).await.unwrap(),
            AcceptResult::ExtendsSide { fork_height: 0 }
        ));
        let b2 = BlockBuilder::new(b1_hash, 2)
            .transactions(vec![Transaction::system(
                TxKind::MintReward,
                Some("b".into()),
                Some(3),
                json!({"n": 3}),
            )])
            .seal(&validator);
        handle.accept_block(b2).await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.height, 2);
        assert_eq!(snapshot.wallet("b").liquid_balance, 5);

        // events: Block(1), Tx, then Reorg and the new tip Block(2)
        let mut saw_reorg = false;
        let mut saw_tip = false;
        while let Ok(event) = events.try_recv() {
            match event {
                LedgerEvent::Reorg { new_height: 2, .. } => saw_reorg = true,
                LedgerEvent::Block { height: 2, .. } => saw_tip = true,
                _ => {}
            }
        }
        assert!(saw_reorg);
        assert!(saw_tip);
    }

    #[tokio::test]
    async fn test_double_sign_triggers_slash_and_removal() {
        let validator = Arc::new(NodeKeypair::generate().unwrap());
        let (handle, _events) = spawn_worker(validator.clone(), validator.node_id());
        let genesis_hash = handle.snapshot().genesis_hash.clone();

        let a = BlockBuilder::new(genesis_hash.clone(), 1).timestamp(100).seal(&validator);
        let b = BlockBuilder::new(genesis_hash, 1).timestamp(101).seal(&validator);
        handle.accept_block(a).await.unwrap();
        handle.accept_block(b).await.unwrap();

        // The slash and removal are queued; seal them.
        let block = handle.propose_block().await.unwrap().expect("response block");
        let kinds: Vec<TxKind> = block.transactions.iter().map(|tx| tx.kind).collect();
        assert!(kinds.contains(&TxKind::Slash));
        assert!(kinds.contains(&TxKind::Governance));
    }

    #[tokio::test]
    async fn test_governance_param_applies_after_latency() {
        let kp = Arc::new(NodeKeypair::generate().unwrap());
        let governance = GovernanceStore::new_default();
        let (events_tx, _events_rx) = crate::events::channel();
        let (worker, handle) = LedgerWorker::bootstrap(
            None,
            kp.node_id(),
            governance.clone(),
            events_tx,
            kp.clone(),
        )
        .unwrap();
        tokio::spawn(worker.run());

        let set_param = Transaction::signed(
            &kp,
            TxKind::Governance,
            None,
            None,
            serde_json::to_value(GovernanceAction::SetParam {
                name: "approval_reward".into(),
                value: json!(42),
            })
            .unwrap(),
        );
        handle.submit_tx(set_param).await.unwrap();
        handle.propose_block().await.unwrap().expect("block 1");
        // sealed at height 1, effective at 1 + latency (10) = 11
        assert_eq!(governance.snapshot().approval_reward, 10);

        for i in 0..10u64 {
            let mint =
                Transaction::system(TxKind::MintReward, Some("pad".into()), Some(1), json!({"i": i}));
            handle.submit_internal(mint).await.unwrap();
            handle.propose_block().await.unwrap().expect("padding block");
        }
        assert_eq!(handle.snapshot().height, 11);
        assert_eq!(governance.snapshot().approval_reward, 42);
    }

    #[tokio::test]
    async fn test_genesis_seeds_treasury() {
        let kp = Arc::new(NodeKeypair::generate().unwrap());
        let (handle, _events) = spawn_worker(kp.clone(), kp.node_id());
        assert_eq!(
            handle.snapshot().wallet(TREASURY_ADDRESS).liquid_balance,
            crate::types::GENESIS_SUPPLY
        );
    }
}
