//! Validation errors for transactions and blocks.
//!
//! Validation errors mean the tx/block is malformed or inadmissible before
//! any state change; they are surfaced to callers as actionable errors.

use thiserror::Error;

/// Transaction rejection reasons.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxError {
    #[error("malformed transaction: {0}")]
    MalformedTx(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("duplicate transaction {0}")]
    DuplicateTx(String),

    #[error("mempool full")]
    Backpressure,

    #[error("sender is not an authority")]
    NotAuthority,

    #[error("ledger worker unavailable")]
    WorkerUnavailable,
}

/// Block rejection reasons.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("unknown parent {0}")]
    UnknownParent(String),

    #[error("height gap: expected {expected}, got {actual}")]
    HeightGap { expected: u64, actual: u64 },

    #[error("merkle root mismatch")]
    MerkleMismatch,

    #[error("invalid validator signature")]
    BadSignature,

    #[error("validator {pubkey} not in authority set at height {height}")]
    StaleAuthority { pubkey: String, height: u64 },

    #[error("too many transactions: {count} > {max}")]
    TooManyTransactions { count: usize, max: usize },

    #[error("duplicate transaction {tx_id} in chain")]
    DuplicateTx { tx_id: String },

    #[error("invalid transaction {tx_id}: {source}")]
    InvalidTx {
        tx_id: String,
        #[source]
        source: TxError,
    },

    #[error("genesis mismatch: block does not extend the local genesis")]
    GenesisMismatch,

    #[error("block extends a chain that failed validation")]
    ExtendsInvalid,

    #[error("timestamp precedes parent block")]
    TimestampBeforeParent,

    #[error("ledger worker unavailable")]
    WorkerUnavailable,
}
