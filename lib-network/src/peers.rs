//! Peer address book, reputation and greylist.
//!
//! Reputation is bounded, numeric and deterministic: the same event always
//! produces the same change, and enforcement only affects connectivity,
//! never chain state. Offenders below the floor are greylisted: no outbound
//! gossip for a fixed window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lib_crypto::unix_now;

/// Maximum peers retained in the address book.
pub const ADDRESS_BOOK_CAPACITY: usize = 64;

/// Greylist window in seconds.
pub const GREYLIST_SECS: u64 = 300;

/// Reputation bounds and default.
const REPUTATION_MIN: i32 = 0;
const REPUTATION_MAX: i32 = 100;
const REPUTATION_DEFAULT: i32 = 50;
/// Below this score a peer is greylisted.
const GREYLIST_THRESHOLD: i32 = 20;

/// Classified peer events and their deterministic deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// Useful, valid message.
    GoodMessage,
    /// Invalid or duplicate gossip.
    BadMessage,
    /// Blocks that consistently fail validation.
    BadChain,
    /// Connection-level misbehavior (oversized frame, bad signature).
    ProtocolViolation,
}

impl PeerEvent {
    pub fn delta(&self) -> i32 {
        match self {
            PeerEvent::GoodMessage => 1,
            PeerEvent::BadMessage => -5,
            PeerEvent::BadChain => -20,
            PeerEvent::ProtocolViolation => -25,
        }
    }
}

/// A known peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node_id: String,
    pub address: String,
    pub last_seen: u64,
    pub reputation: i32,
    #[serde(default)]
    pub greylisted_until: u64,
}

impl PeerInfo {
    fn new(node_id: String, address: String) -> Self {
        Self {
            node_id,
            address,
            last_seen: unix_now(),
            reputation: REPUTATION_DEFAULT,
            greylisted_until: 0,
        }
    }
}

/// Bounded address book with JSON persistence.
pub struct AddressBook {
    peers: HashMap<String, PeerInfo>,
    path: Option<PathBuf>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            path: None,
        }
    }

    /// Load from `peers.json`, creating an empty book when absent.
    pub fn load(path: &Path) -> Self {
        let peers = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Vec<PeerInfo>>(&raw).ok())
            .map(|list| {
                list.into_iter()
                    .map(|p| (p.node_id.clone(), p))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();
        if !peers.is_empty() {
            info!(count = peers.len(), "loaded address book");
        }
        Self {
            peers,
            path: Some(path.to_path_buf()),
        }
    }

    fn persist(&self) {
        if let Some(path) = &self.path {
            let list: Vec<&PeerInfo> = self.peers.values().collect();
            if let Ok(raw) = serde_json::to_string_pretty(&list) {
                if let Err(e) = std::fs::write(path, raw) {
                    warn!(error = %e, "failed to persist address book");
                }
            }
        }
    }

    /// Record (or refresh) a peer. The book is bounded; when full, the
    /// lowest-reputation peer is evicted first.
    pub fn upsert(&mut self, node_id: &str, address: &str) {
        if let Some(existing) = self.peers.get_mut(node_id) {
            existing.address = address.to_string();
            existing.last_seen = unix_now();
            self.persist();
            return;
        }
        if self.peers.len() >= ADDRESS_BOOK_CAPACITY {
            if let Some(worst) = self
                .peers
                .values()
                .min_by_key(|p| (p.reputation, p.last_seen))
                .map(|p| p.node_id.clone())
            {
                self.peers.remove(&worst);
            }
        }
        self.peers
            .insert(node_id.to_string(), PeerInfo::new(node_id.to_string(), address.to_string()));
        self.persist();
    }

    pub fn get(&self, node_id: &str) -> Option<&PeerInfo> {
        self.peers.get(node_id)
    }

    pub fn list(&self) -> Vec<PeerInfo> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Apply a classified event; greylists the peer when it sinks below the
    /// floor. Returns the new reputation.
    pub fn record_event(&mut self, node_id: &str, event: PeerEvent) -> i32 {
        let Some(peer) = self.peers.get_mut(node_id) else {
            return REPUTATION_DEFAULT;
        };
        peer.reputation = (peer.reputation + event.delta()).clamp(REPUTATION_MIN, REPUTATION_MAX);
        peer.last_seen = unix_now();
        if peer.reputation < GREYLIST_THRESHOLD && peer.greylisted_until < unix_now() {
            peer.greylisted_until = unix_now() + GREYLIST_SECS;
            // Greylisting resets the score so the peer gets a clean slate
            // once the window expires.
            peer.reputation = REPUTATION_DEFAULT;
            warn!(peer = node_id, "peer greylisted");
        }
        let reputation = peer.reputation;
        self.persist();
        reputation
    }

    pub fn is_greylisted(&self, node_id: &str) -> bool {
        self.peers
            .get(node_id)
            .map(|p| p.greylisted_until > unix_now())
            .unwrap_or(false)
    }

    /// Discovery sample piggybacked on Hello replies.
    pub fn sample(&self, limit: usize) -> Vec<PeerInfo> {
        let mut list: Vec<PeerInfo> = self
            .peers
            .values()
            .filter(|p| p.greylisted_until <= unix_now())
            .cloned()
            .collect();
        list.sort_by_key(|p| std::cmp::Reverse(p.reputation));
        list.truncate(limit);
        list
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::new()
    }
}
