//! Distributed memory DAG.
//!
//! Stores the causal chain of reasoning: knowledge, proposals, rounds,
//! votes, decisions and burns. Unlike the ledger, each node points at its
//! parents, producing a readable audit trail. The chain holds economic
//! truth; the DAG holds provenance. They are linked by `audit_refs` in
//! decision payloads, and neither is authoritative for the other.
//!
//! Agent reputations persist in a second tree of the same database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::{Db, Tree};
use thiserror::Error;
use tracing::debug;

use lib_crypto::{canonical_json_bytes, sha256_hex, unix_now};

const TREE_NODES: &str = "dag_nodes";
const TREE_REPUTATION: &str = "reputation";

/// Memory store failures.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt node record {0}")]
    Corrupt(String),
}

/// Kinds of memory atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Knowledge,
    Proposal,
    Round,
    Vote,
    Decision,
    Burn,
}

/// A single sealed atom of memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: String,
    pub kind: NodeKind,
    pub parents: Vec<String>,
    /// SHA-256 of the canonical payload; the payload itself is stored too.
    pub payload_hash: String,
    pub payload: Value,
    pub agent_id: String,
    pub timestamp: u64,
}

/// Fields covered by the node id (the seal).
#[derive(Serialize)]
struct SealInput<'a> {
    kind: &'a NodeKind,
    parents: &'a [String],
    payload_hash: &'a str,
    agent_id: &'a str,
    timestamp: u64,
}

/// Append-only DAG with sled persistence.
///
/// Cloneable; writes are serialized by an internal mutex (the deliberation
/// workers are the only writers).
#[derive(Clone)]
pub struct MemoryDag {
    inner: Arc<MemoryDagInner>,
}

struct MemoryDagInner {
    _db: Option<Db>,
    nodes_tree: Option<Tree>,
    reputation_tree: Option<Tree>,
    cache: Mutex<HashMap<String, MemoryNode>>,
}

impl MemoryDag {
    /// Open (or create) `memory.db` at `path`.
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        let db = sled::open(path)?;
        let nodes_tree = db.open_tree(TREE_NODES)?;
        let reputation_tree = db.open_tree(TREE_REPUTATION)?;

        let mut cache = HashMap::new();
        for kv in nodes_tree.iter() {
            let (key, value) = kv?;
            let node: MemoryNode = serde_json::from_slice(&value)
                .map_err(|_| MemoryError::Corrupt(String::from_utf8_lossy(&key).to_string()))?;
            cache.insert(node.id.clone(), node);
        }
        debug!(nodes = cache.len(), "memory DAG loaded");

        Ok(Self {
            inner: Arc::new(MemoryDagInner {
                nodes_tree: Some(nodes_tree),
                reputation_tree: Some(reputation_tree),
                _db: Some(db),
                cache: Mutex::new(cache),
            }),
        })
    }

    /// In-memory DAG with no persistence, for tests and ephemeral nodes.
    pub fn ephemeral() -> Self {
        Self {
            inner: Arc::new(MemoryDagInner {
                _db: None,
                nodes_tree: None,
                reputation_tree: None,
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create, seal and store a new node; returns its id.
    pub fn add_node(
        &self,
        kind: NodeKind,
        payload: Value,
        agent_id: &str,
        parents: Vec<String>,
    ) -> Result<String, MemoryError> {
        let payload_hash = sha256_hex(&canonical_json_bytes(&payload));
        let timestamp = unix_now();
        let mut sorted_parents = parents;
        sorted_parents.sort();
        let id = sha256_hex(&canonical_json_bytes(&SealInput {
            kind: &kind,
            parents: &sorted_parents,
            payload_hash: &payload_hash,
            agent_id,
            timestamp,
        }));

        let node = MemoryNode {
            id: id.clone(),
            kind,
            parents: sorted_parents,
            payload_hash,
            payload,
            agent_id: agent_id.to_string(),
            timestamp,
        };

        if let Some(tree) = &self.inner.nodes_tree {
            let bytes = serde_json::to_vec(&node).map_err(|e| MemoryError::Corrupt(e.to_string()))?;
            tree.insert(id.as_bytes(), bytes)?;
        }
        self.inner.cache.lock().insert(id.clone(), node);
        debug!(id = %&id[..12], ?kind, "memory node added");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<MemoryNode> {
        self.inner.cache.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recursively collect the history that led to a node, newest first.
    /// Used for explainability.
    pub fn audit_trail(&self, id: &str) -> Vec<MemoryNode> {
        let cache = self.inner.cache.lock();
        let mut trail = Vec::new();
        let mut stack = vec![id.to_string()];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = cache.get(&current) {
                stack.extend(node.parents.iter().cloned());
                trail.push(node.clone());
            }
        }
        trail
    }

    // ----- reputation persistence -----

    /// Load the persisted reputation table.
    pub fn load_reputations(&self) -> HashMap<String, f64> {
        let Some(tree) = &self.inner.reputation_tree else {
            return HashMap::new();
        };
        tree.iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(key, value)| {
                let name = String::from_utf8(key.to_vec()).ok()?;
                let bytes: [u8; 8] = value.as_ref().try_into().ok()?;
                Some((name, f64::from_be_bytes(bytes)))
            })
            .collect()
    }

    /// Persist a single agent's reputation.
    pub fn store_reputation(&self, agent_id: &str, weight: f64) -> Result<(), MemoryError> {
        if let Some(tree) = &self.inner.reputation_tree {
            tree.insert(agent_id.as_bytes(), weight.to_be_bytes().to_vec())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_add_and_get() {
        let dag = MemoryDag::ephemeral();
        let id = dag
            .add_node(NodeKind::Proposal, json!({"title": "t"}), "engine", vec![])
            .unwrap();
        let node = dag.get(&id).unwrap();
        assert_eq!(node.kind, NodeKind::Proposal);
        assert_eq!(node.payload["title"], "t");
        assert_eq!(node.payload_hash.len(), 64);
    }

    #[test]
    fn test_audit_trail_walks_parents() {
        let dag = MemoryDag::ephemeral();
        let knowledge = dag
            .add_node(NodeKind::Knowledge, json!({"fact": 1}), "seeker", vec![])
            .unwrap();
        let proposal = dag
            .add_node(NodeKind::Proposal, json!({}), "engine", vec![knowledge.clone()])
            .unwrap();
        let round = dag
            .add_node(NodeKind::Round, json!({"round": 1}), "engine", vec![proposal.clone()])
            .unwrap();
        let decision = dag
            .add_node(NodeKind::Decision, json!({}), "engine", vec![round])
            .unwrap();

        let trail = dag.audit_trail(&decision);
        assert_eq!(trail.len(), 4);
        let kinds: Vec<NodeKind> = trail.iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&NodeKind::Knowledge));
        assert!(kinds.contains(&NodeKind::Decision));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let id = {
            let dag = MemoryDag::open(dir.path()).unwrap();
            dag.add_node(NodeKind::Vote, json!({"vote": "approve"}), "guardian", vec![])
                .unwrap()
        };
        let dag = MemoryDag::open(dir.path()).unwrap();
        assert_eq!(dag.len(), 1);
        assert_eq!(dag.get(&id).unwrap().agent_id, "guardian");
    }

    #[test]
    fn test_reputation_roundtrip() {
        let dir = tempdir().unwrap();
        {
            let dag = MemoryDag::open(dir.path()).unwrap();
            dag.store_reputation("seeker", 0.83).unwrap();
        }
        let dag = MemoryDag::open(dir.path()).unwrap();
        let reputations = dag.load_reputations();
        assert!((reputations["seeker"] - 0.83).abs() < 1e-12);
    }

    #[test]
    fn test_diamond_trail_visits_once() {
        let dag = MemoryDag::ephemeral();
        let root = dag.add_node(NodeKind::Knowledge, json!({}), "a", vec![]).unwrap();
        let left = dag.add_node(NodeKind::Vote, json!({"s": "l"}), "a", vec![root.clone()]).unwrap();
        let right = dag.add_node(NodeKind::Vote, json!({"s": "r"}), "a", vec![root.clone()]).unwrap();
        let merge = dag
            .add_node(NodeKind::Decision, json!({}), "a", vec![left, right])
            .unwrap();
        let trail = dag.audit_trail(&merge);
        assert_eq!(trail.len(), 4);
    }
}
