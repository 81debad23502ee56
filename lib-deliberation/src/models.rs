//! Proposals, votes, round results and decisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use lib_crypto::{canonical_json_bytes, unix_now, verify_signature, NodeKeypair};
use lib_governance::ProposalCategory;

use crate::ulfr::UlfrScore;

/// Domain of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalDomain {
    Healthcare,
    Finance,
    Education,
    Environment,
    Security,
    Governance,
    Technology,
    Social,
    Legal,
    #[default]
    Other,
}

/// An ethical proposal under deliberation.
///
/// Immutable once admitted; a refinement is a *new* proposal referencing its
/// parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: ProposalCategory,
    #[serde(default)]
    pub domain: ProposalDomain,
    /// Hex public key of the submitter.
    pub submitter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Per-round refinement summaries accumulated along the lineage.
    #[serde(default)]
    pub refinements: Vec<String>,
    pub created_at: u64,
}

impl Proposal {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        category: ProposalCategory,
        domain: ProposalDomain,
        submitter: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            category,
            domain,
            submitter: submitter.into(),
            parent_id: None,
            refinements: Vec::new(),
            created_at: unix_now(),
        }
    }

    /// Child proposal produced by the Mediator. Lineage is preserved; the
    /// child starts a fresh entity with the refined description.
    pub fn refined_child(&self, refined_description: String, round_no: u32) -> Self {
        let mut refinements = self.refinements.clone();
        let snippet: String = refined_description.chars().take(100).collect();
        refinements.push(format!("round {round_no}: {snippet}"));
        Self {
            id: Uuid::new_v4(),
            title: self.title.clone(),
            description: refined_description,
            category: self.category,
            domain: self.domain,
            submitter: self.submitter.clone(),
            parent_id: Some(self.id),
            refinements,
            created_at: unix_now(),
        }
    }
}

/// An agent's discrete vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
    Abstain,
}

impl VoteDecision {
    /// Numeric vote used by the consensus formula.
    pub fn numeric(&self) -> f64 {
        match self {
            VoteDecision::Approve => 1.0,
            VoteDecision::Reject => 0.0,
            VoteDecision::Abstain => 0.5,
        }
    }
}

/// A signed agent vote for one round of one proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub agent_id: String,
    pub agent_pubkey: String,
    pub proposal_id: Uuid,
    pub round: u32,
    pub decision: VoteDecision,
    pub ulfr: UlfrScore,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Fields covered by the vote signature.
#[derive(Serialize)]
struct VoteBody<'a> {
    agent_id: &'a str,
    agent_pubkey: &'a str,
    proposal_id: &'a Uuid,
    round: u32,
    decision: &'a VoteDecision,
    ulfr: &'a UlfrScore,
    confidence: f64,
    reasoning: &'a str,
}

impl Vote {
    fn signing_bytes(&self) -> Vec<u8> {
        canonical_json_bytes(&VoteBody {
            agent_id: &self.agent_id,
            agent_pubkey: &self.agent_pubkey,
            proposal_id: &self.proposal_id,
            round: self.round,
            decision: &self.decision,
            ulfr: &self.ulfr,
            confidence: self.confidence,
            reasoning: &self.reasoning,
        })
    }

    /// Sign with the agent's keypair; binds the vote to its public key.
    pub fn sign(&mut self, keypair: &NodeKeypair) {
        self.agent_pubkey = keypair.node_id();
        self.signature = Some(keypair.sign_hex(&self.signing_bytes()));
    }

    pub fn verify(&self) -> bool {
        match &self.signature {
            Some(signature) => {
                verify_signature(&self.agent_pubkey, &self.signing_bytes(), signature)
            }
            None => false,
        }
    }
}

/// Outcome of a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    Approved,
    Rejected,
    Refined,
    TimedOut,
}

/// Aggregated result of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_no: u32,
    pub votes: Vec<Vote>,
    pub weighted_score: f64,
    /// Deductive ULFR sanity score; audit only, except for the safety floor.
    pub sanity_score: f64,
    pub threshold: f64,
    pub threshold_min: f64,
    pub outcome: RoundOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_proposal_id: Option<Uuid>,
}

/// Terminal outcome of a proposal's deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    /// Superseded by a refined child proposal.
    Refined,
    TimedOut,
}

impl std::fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionOutcome::Approved => "approved",
            DecisionOutcome::Rejected => "rejected",
            DecisionOutcome::Refined => "refined",
            DecisionOutcome::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Final verdict; created exactly once per proposal that reaches a terminal
/// outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub proposal_id: Uuid,
    pub outcome: DecisionOutcome,
    pub rounds: Vec<RoundResult>,
    pub weighted_score: f64,
    /// Memory DAG node ids backing this verdict.
    pub audit_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_proposal_id: Option<Uuid>,
}

impl Decision {
    /// Ledger payload for the `decision_record` transaction.
    pub fn to_tx_payload(&self) -> Value {
        serde_json::json!({
            "proposal_id": self.proposal_id.to_string(),
            "outcome": self.outcome.to_string(),
            "weighted_score": self.weighted_score,
            "rounds": self.rounds.len(),
            "audit_refs": self.audit_refs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(kp: &NodeKeypair) -> Vote {
        let mut vote = Vote {
            agent_id: "seeker".into(),
            agent_pubkey: String::new(),
            proposal_id: Uuid::new_v4(),
            round: 1,
            decision: VoteDecision::Approve,
            ulfr: UlfrScore::clamped(0.8, 0.7, 0.1, 0.1),
            confidence: 0.9,
            reasoning: "high utility".into(),
            concerns: vec![],
            recommendations: vec![],
            signature: None,
        };
        vote.sign(kp);
        vote
    }

    #[test]
    fn test_vote_sign_verify() {
        let kp = NodeKeypair::generate().unwrap();
        let vote = vote(&kp);
        assert!(vote.verify());
    }

    #[test]
    fn test_tampered_vote_fails() {
        let kp = NodeKeypair::generate().unwrap();
        let mut vote = vote(&kp);
        vote.decision = VoteDecision::Reject;
        assert!(!vote.verify());
    }

    #[test]
    fn test_unsigned_vote_does_not_verify() {
        let kp = NodeKeypair::generate().unwrap();
        let mut vote = vote(&kp);
        vote.signature = None;
        assert!(!vote.verify());
    }

    #[test]
    fn test_refined_child_lineage() {
        let parent = Proposal::new(
            "Deploy triage bot",
            "Use an automated triage bot in the ER.",
            ProposalCategory::HighImpact,
            ProposalDomain::Healthcare,
            "ab".repeat(32),
        );
        let child = parent.refined_child("Use the bot with human oversight.".into(), 1);
        assert_eq!(child.parent_id, Some(parent.id));
        assert_ne!(child.id, parent.id);
        assert_eq!(child.title, parent.title);
        assert_eq!(child.refinements.len(), 1);
        assert!(child.refinements[0].starts_with("round 1:"));
    }

    #[test]
    fn test_vote_numeric_values() {
        assert_eq!(VoteDecision::Approve.numeric(), 1.0);
        assert_eq!(VoteDecision::Reject.numeric(), 0.0);
        assert_eq!(VoteDecision::Abstain.numeric(), 0.5);
    }
}
