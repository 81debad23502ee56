//! Mesh message types and the authenticated envelope.
//!
//! Every wire message is wrapped in an envelope whose signature covers
//! `SHA-256(canonical_json(msg) || nonce)`. Forwarded gossip is re-sealed by
//! each hop under the forwarder's key with an incremented hop count.

use serde::{Deserialize, Serialize};

use lib_crypto::{canonical_json_bytes, sha256_raw, verify_signature, NodeKeypair};
use lib_ledger::{Block, Transaction};

/// A dialable peer address exchanged during handshakes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub node_id: String,
    pub address: String,
}

/// Mesh protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetMessage {
    Hello {
        node_id: String,
        listen_addr: String,
        head_height: u64,
        head_hash: String,
        /// Address-book sample piggybacked for discovery.
        #[serde(default)]
        known_peers: Vec<PeerAddr>,
    },
    GetBlocks {
        from_height: u64,
        limit: u64,
    },
    Blocks {
        blocks: Vec<Block>,
    },
    NewTx {
        tx: Transaction,
    },
    NewBlock {
        block: Block,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
    },
}

impl NetMessage {
    /// Gossip identity for the seen-cache; non-gossip messages have none.
    pub fn gossip_id(&self) -> Option<String> {
        match self {
            NetMessage::NewTx { tx } => Some(format!("tx:{}", tx.id)),
            NetMessage::NewBlock { block } => Some(format!("block:{}", block.hash())),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NetMessage::Hello { .. } => "hello",
            NetMessage::GetBlocks { .. } => "get_blocks",
            NetMessage::Blocks { .. } => "blocks",
            NetMessage::NewTx { .. } => "new_tx",
            NetMessage::NewBlock { .. } => "new_block",
            NetMessage::Ping { .. } => "ping",
            NetMessage::Pong { .. } => "pong",
        }
    }
}

/// Signed wrapper around every mesh message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg: NetMessage,
    /// Hex public key of the (last) sender.
    pub sender: String,
    pub nonce: u64,
    #[serde(default)]
    pub hop_count: u8,
    pub signature: String,
}

fn envelope_digest(msg: &NetMessage, nonce: u64) -> [u8; 32] {
    let mut bytes = canonical_json_bytes(msg);
    bytes.extend_from_slice(&nonce.to_be_bytes());
    sha256_raw(&bytes)
}

impl Envelope {
    /// Sign a message under the local identity.
    pub fn seal(keypair: &NodeKeypair, msg: NetMessage, nonce: u64, hop_count: u8) -> Self {
        let digest = envelope_digest(&msg, nonce);
        Self {
            sender: keypair.node_id(),
            signature: keypair.sign_hex(&digest),
            msg,
            nonce,
            hop_count,
        }
    }

    /// Verify the sender's signature.
    pub fn verify(&self) -> bool {
        let digest = envelope_digest(&self.msg, self.nonce);
        verify_signature(&self.sender, &digest, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_verify_roundtrip() {
        let kp = NodeKeypair::generate().unwrap();
        let envelope = Envelope::seal(&kp, NetMessage::Ping { nonce: 7 }, 42, 0);
        assert!(envelope.verify());
        assert_eq!(envelope.sender, kp.node_id());
    }

    #[test]
    fn test_tampered_message_fails() {
        let kp = NodeKeypair::generate().unwrap();
        let mut envelope = Envelope::seal(&kp, NetMessage::Ping { nonce: 7 }, 42, 0);
        envelope.msg = NetMessage::Ping { nonce: 8 };
        assert!(!envelope.verify());
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let kp = NodeKeypair::generate().unwrap();
        let mut envelope = Envelope::seal(&kp, NetMessage::Ping { nonce: 7 }, 42, 0);
        envelope.nonce = 43;
        assert!(!envelope.verify());
    }

    #[test]
    fn test_wire_roundtrip() {
        let kp = NodeKeypair::generate().unwrap();
        let envelope = Envelope::seal(
            &kp,
            NetMessage::Hello {
                node_id: kp.node_id(),
                listen_addr: "127.0.0.1:6430".into(),
                head_height: 3,
                head_hash: "ab".repeat(32),
                known_peers: vec![PeerAddr {
                    node_id: "cd".repeat(32),
                    address: "10.0.0.2:6430".into(),
                }],
            },
            1,
            0,
        );
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        assert!(decoded.verify());
    }

    #[test]
    fn test_gossip_ids() {
        let tx = Transaction::system(
            lib_ledger::TxKind::MintReward,
            Some("a".into()),
            Some(1),
            serde_json::json!({}),
        );
        let msg = NetMessage::NewTx { tx: tx.clone() };
        assert_eq!(msg.gossip_id(), Some(format!("tx:{}", tx.id)));
        assert_eq!(NetMessage::Ping { nonce: 1 }.gossip_id(), None);
    }
}
