//! Deliberation event emission.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{DecisionOutcome, Vote};

/// Events emitted while a deliberation progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeliberationEvent {
    Started {
        proposal_id: Uuid,
    },
    Round {
        proposal_id: Uuid,
        round_no: u32,
        votes: Vec<Vote>,
        score: f64,
    },
    Refined {
        parent_id: Uuid,
        child_id: Uuid,
    },
    Terminal {
        proposal_id: Uuid,
        outcome: DecisionOutcome,
        score: f64,
    },
    /// Provider-driven degradation, surfaced so observers see why a round
    /// abstained.
    Error {
        proposal_id: Uuid,
        kind: String,
        message: String,
    },
}

/// Bounded per-subscriber queue, matching the ledger bus.
pub const DELIBERATION_EVENT_CAPACITY: usize = 256;

pub fn channel() -> (
    broadcast::Sender<DeliberationEvent>,
    broadcast::Receiver<DeliberationEvent>,
) {
    broadcast::channel(DELIBERATION_EVENT_CAPACITY)
}
