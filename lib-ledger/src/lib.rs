//! Orbis Ethica ledger.
//!
//! Blocks, transactions, merkle commitments, validation, the single-mutator
//! ledger worker, mempool, wallet read-model and sled persistence. Consensus
//! is Proof-of-Authority with longest-valid-chain reconciliation: the active
//! chain is the longest chain whose every block is signed by the authority
//! set known at its height.

pub mod block;
pub mod chain;
pub mod events;
pub mod evidence;
pub mod mempool;
pub mod merkle;
pub mod store;
pub mod transaction;
pub mod types;
pub mod validation;
pub mod wallet;
pub mod worker;

pub use block::{build_genesis, Block, BlockBuilder, SignedHeader};
pub use chain::{AcceptResult, AuthoritySchedule, Chain, LedgerState, ReorgInfo};
pub use events::LedgerEvent;
pub use evidence::{DoubleSignEvidence, DoubleSignRegistry};
pub use mempool::Mempool;
pub use merkle::merkle_root;
pub use store::{ChainDb, StoreError};
pub use transaction::{GovernanceAction, Transaction, TxKind};
pub use types::{AccountState, Address, Amount, BlockHeight, TxId};
pub use validation::{BlockError, TxError};
pub use wallet::WalletView;
pub use worker::{ChainSnapshot, LedgerHandle, LedgerWorker};
