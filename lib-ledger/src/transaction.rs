//! Ledger transactions.
//!
//! A transaction is a tagged union over a common header. The id is the
//! SHA-256 of the canonical body (everything except `id` and `signature`);
//! signatures cover the same bytes. `mint_reward` and `slash` originate from
//! the system and carry no signature.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lib_crypto::{canonical_json_bytes, sha256_hex, unix_now, NodeKeypair};

use crate::types::{Address, Amount, SYSTEM_SENDER};

/// Transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    MintReward,
    Transfer,
    Stake,
    Slash,
    DecisionRecord,
    KnowledgeIngest,
    Governance,
}

impl TxKind {
    /// System kinds have `sender = "system"` and no signature; they enter
    /// blocks only through trusted local flows (deliberation terminal
    /// actions, double-sign evidence).
    pub fn is_system(&self) -> bool {
        matches!(self, TxKind::MintReward | TxKind::Slash)
    }

    /// Kinds that move or lock value and therefore require an amount.
    pub fn requires_amount(&self) -> bool {
        matches!(
            self,
            TxKind::MintReward | TxKind::Transfer | TxKind::Stake | TxKind::Slash
        )
    }

    /// Kinds that require a recipient.
    pub fn requires_recipient(&self) -> bool {
        matches!(self, TxKind::MintReward | TxKind::Transfer)
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxKind::MintReward => "mint_reward",
            TxKind::Transfer => "transfer",
            TxKind::Stake => "stake",
            TxKind::Slash => "slash",
            TxKind::DecisionRecord => "decision_record",
            TxKind::KnowledgeIngest => "knowledge_ingest",
            TxKind::Governance => "governance",
        };
        write!(f, "{s}")
    }
}

/// Governance actions carried in a `governance` transaction payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GovernanceAction {
    AddAuthority {
        pubkey: Address,
    },
    RemoveAuthority {
        pubkey: Address,
        /// Double-sign evidence; when present and valid, the tx is accepted
        /// regardless of the sender's authority status.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evidence: Option<crate::evidence::DoubleSignEvidence>,
    },
    SetParam {
        name: String,
        value: Value,
    },
}

/// A ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TxKind,
    pub sender: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    pub payload: Value,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Canonical body used for both the id and the signature.
#[derive(Serialize)]
struct TxBody<'a> {
    kind: &'a TxKind,
    sender: &'a str,
    recipient: &'a Option<Address>,
    amount: &'a Option<Amount>,
    payload: &'a Value,
    timestamp: u64,
}

impl Transaction {
    /// Assemble and sign a transaction with the node identity.
    pub fn signed(
        keypair: &NodeKeypair,
        kind: TxKind,
        recipient: Option<Address>,
        amount: Option<Amount>,
        payload: Value,
    ) -> Self {
        let mut tx = Self {
            id: String::new(),
            kind,
            sender: keypair.node_id(),
            recipient,
            amount,
            payload,
            timestamp: unix_now(),
            signature: None,
        };
        tx.id = tx.compute_id();
        tx.signature = Some(keypair.sign_hex(&tx.signing_bytes()));
        tx
    }

    /// Assemble a system transaction (no signature).
    pub fn system(kind: TxKind, recipient: Option<Address>, amount: Option<Amount>, payload: Value) -> Self {
        let mut tx = Self {
            id: String::new(),
            kind,
            sender: SYSTEM_SENDER.to_string(),
            recipient,
            amount,
            payload,
            timestamp: unix_now(),
            signature: None,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        canonical_json_bytes(&TxBody {
            kind: &self.kind,
            sender: &self.sender,
            recipient: &self.recipient,
            amount: &self.amount,
            payload: &self.payload,
            timestamp: self.timestamp,
        })
    }

    /// Recompute the id from the canonical body.
    pub fn compute_id(&self) -> String {
        sha256_hex(&self.signing_bytes())
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Parse the governance action from a `governance` tx payload.
    pub fn governance_action(&self) -> Option<GovernanceAction> {
        if self.kind != TxKind::Governance {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_covers_body() {
        let kp = NodeKeypair::generate().unwrap();
        let tx = Transaction::signed(&kp, TxKind::Transfer, Some("bob".into()), Some(5), json!({}));
        assert_eq!(tx.id, tx.compute_id());

        let mut altered = tx.clone();
        altered.amount = Some(6);
        assert_ne!(altered.compute_id(), tx.id);
    }

    #[test]
    fn test_system_tx_unsigned() {
        let tx = Transaction::system(TxKind::MintReward, Some("alice".into()), Some(10), json!({}));
        assert!(tx.is_system());
        assert!(tx.signature.is_none());
        assert_eq!(tx.sender, SYSTEM_SENDER);
    }

    #[test]
    fn test_signature_verifies_over_signing_bytes() {
        let kp = NodeKeypair::generate().unwrap();
        let tx = Transaction::signed(&kp, TxKind::Stake, None, Some(100), json!({"note": "lockup"}));
        let sig = tx.signature.clone().unwrap();
        assert!(lib_crypto::verify_signature(&tx.sender, &tx.signing_bytes(), &sig));
    }

    #[test]
    fn test_governance_action_roundtrip() {
        let kp = NodeKeypair::generate().unwrap();
        let action = GovernanceAction::SetParam {
            name: "approval_reward".into(),
            value: json!(25),
        };
        let tx = Transaction::signed(
            &kp,
            TxKind::Governance,
            None,
            None,
            serde_json::to_value(&action).unwrap(),
        );
        assert_eq!(tx.governance_action(), Some(action));
    }

    #[test]
    fn test_non_governance_has_no_action() {
        let tx = Transaction::system(TxKind::MintReward, Some("a".into()), Some(1), json!({}));
        assert!(tx.governance_action().is_none());
    }
}
