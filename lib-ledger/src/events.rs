//! Ledger event emission.
//!
//! Chain-tip progression and canonical transaction acceptance are published
//! on a broadcast channel; the node fans them out to SSE subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::transaction::TxKind;

/// Events emitted by the ledger worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// A block joined the active chain.
    Block { height: u64, hash: String },
    /// A transaction became canonical.
    Tx { id: String, kind: TxKind },
    /// The active chain switched to a longer valid fork.
    Reorg {
        old_height: u64,
        new_height: u64,
        fork_height: u64,
    },
}

impl std::fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerEvent::Block { height, .. } => write!(f, "Block(height={height})"),
            LedgerEvent::Tx { id, .. } => write!(f, "Tx({})", &id[..id.len().min(12)]),
            LedgerEvent::Reorg { old_height, new_height, .. } => {
                write!(f, "Reorg({old_height}->{new_height})")
            }
        }
    }
}

/// Bounded per-subscriber queue; laggards observe a lag error and are told
/// to resync from current state.
pub const LEDGER_EVENT_CAPACITY: usize = 256;

/// Create the ledger event channel.
pub fn channel() -> (broadcast::Sender<LedgerEvent>, broadcast::Receiver<LedgerEvent>) {
    broadcast::channel(LEDGER_EVENT_CAPACITY)
}
