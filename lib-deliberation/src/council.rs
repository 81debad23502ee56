//! Council fan-out, weighted consensus and agent reputation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use lib_governance::GovernanceParams;
use lib_memory::MemoryDag;

use crate::agents::{AgentRole, CouncilAgent};
use crate::models::{Proposal, Vote, VoteDecision};
use crate::provider::{GenerativeCapability, ProviderError};

/// Default weight for an agent with no history.
const DEFAULT_REPUTATION: f64 = 0.5;

/// Persistent per-agent reputation, clamped to [0, 1].
///
/// A share of an agent's reputation can be staked on high-stakes votes;
/// staked reputation is released on honest participation and slashed on
/// misbehavior.
pub struct ReputationTable {
    weights: Mutex<HashMap<String, f64>>,
    stakes: Mutex<HashMap<String, f64>>,
    dag: MemoryDag,
}

impl ReputationTable {
    pub fn load(dag: MemoryDag) -> Self {
        let weights = dag.load_reputations();
        Self {
            weights: Mutex::new(weights),
            stakes: Mutex::new(HashMap::new()),
            dag,
        }
    }

    pub fn get(&self, agent_id: &str) -> f64 {
        self.weights
            .lock()
            .get(agent_id)
            .copied()
            .unwrap_or(DEFAULT_REPUTATION)
    }

    fn set(&self, agent_id: &str, weight: f64) {
        let weight = weight.clamp(0.0, 1.0);
        self.weights.lock().insert(agent_id.to_string(), weight);
        if let Err(e) = self.dag.store_reputation(agent_id, weight) {
            warn!(agent = agent_id, error = %e, "failed to persist reputation");
        }
    }

    /// Alignment update on a terminal outcome:
    /// `w <- clamp(w + lambda * (aligned ? +step_up : -step_down))`.
    /// Abstaining agents (vote sign zero) are not updated.
    pub fn update_on_terminal(&self, votes: &[Vote], weighted_score: f64, params: &GovernanceParams) {
        let consensus_sign = sign(weighted_score - 0.5);
        for vote in votes {
            let vote_sign = sign(vote.decision.numeric() - 0.5);
            if vote_sign == 0 {
                continue;
            }
            let aligned = vote_sign == consensus_sign;
            let delta = if aligned {
                params.reputation_lambda * params.reputation_step_aligned
            } else {
                -params.reputation_lambda * params.reputation_step_misaligned
            };
            let current = self.get(&vote.agent_id);
            self.set(&vote.agent_id, current + delta);
            debug!(agent = %vote.agent_id, aligned, "reputation updated");
        }
    }

    pub fn staked(&self, agent_id: &str) -> f64 {
        self.stakes.lock().get(agent_id).copied().unwrap_or(0.0)
    }

    /// Lock part of an agent's free reputation behind a high-stakes vote.
    /// Fails when the agent lacks enough unstaked reputation.
    pub fn stake(&self, agent_id: &str, amount: f64) -> bool {
        if amount <= 0.0 {
            return false;
        }
        let free = self.get(agent_id) - self.staked(agent_id);
        if free < amount {
            return false;
        }
        *self.stakes.lock().entry(agent_id.to_string()).or_insert(0.0) += amount;
        true
    }

    /// Release a stake after honest participation.
    pub fn release_stake(&self, agent_id: &str, amount: f64) {
        let mut stakes = self.stakes.lock();
        let staked = stakes.entry(agent_id.to_string()).or_insert(0.0);
        *staked = (*staked - amount).max(0.0);
    }

    /// Burn a staked amount: the reputation is gone, not just unlocked.
    pub fn slash_stake(&self, agent_id: &str, amount: f64) -> f64 {
        let amount = amount.max(0.0);
        {
            let mut stakes = self.stakes.lock();
            let staked = stakes.entry(agent_id.to_string()).or_insert(0.0);
            *staked = (*staked - amount).max(0.0);
        }
        let next = self.get(agent_id) - amount;
        warn!(agent = agent_id, amount, "staked reputation slashed");
        self.set(agent_id, next);
        self.get(agent_id)
    }

    /// Immediate slash to zero on cryptographic misbehavior. The burn is
    /// recorded in the audit DAG.
    pub fn slash_to_zero(&self, agent_id: &str) {
        warn!(agent = agent_id, "reputation burned");
        self.set(agent_id, 0.0);
        if let Err(e) = self.dag.add_node(
            lib_memory::NodeKind::Burn,
            serde_json::json!({"agent_id": agent_id, "reason": "cryptographic misbehavior"}),
            agent_id,
            vec![],
        ) {
            warn!(agent = agent_id, error = %e, "failed to record burn node");
        }
    }
}

fn sign(x: f64) -> i8 {
    if x > f64::EPSILON {
        1
    } else if x < -f64::EPSILON {
        -1
    } else {
        0
    }
}

/// Votes returned before the round deadline plus per-agent failures.
pub struct RoundVotes {
    pub votes: Vec<Vote>,
    pub failures: Vec<(String, ProviderError)>,
}

/// The fixed council of six role-polymorphic agents.
pub struct Council {
    agents: Vec<Arc<CouncilAgent>>,
    pub reputation: ReputationTable,
}

impl Council {
    /// Standard six-role council over one shared provider.
    pub fn standard(provider: Arc<dyn GenerativeCapability>, dag: MemoryDag) -> anyhow::Result<Self> {
        let agents = AgentRole::ALL
            .iter()
            .map(|role| CouncilAgent::new(*role, provider.clone()).map(Arc::new))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            agents,
            reputation: ReputationTable::load(dag),
        })
    }

    pub fn size(&self) -> usize {
        self.agents.len()
    }

    pub fn agent(&self, role: AgentRole) -> Option<&Arc<CouncilAgent>> {
        self.agents.iter().find(|a| a.role == role)
    }

    /// Fan the proposal out to every agent with a per-round deadline.
    ///
    /// Agents that error or exceed the deadline return no vote; in-flight
    /// generation is cancelled when the deadline fires.
    pub async fn evaluate_round(
        &self,
        proposal: &Proposal,
        memory_ctx: &str,
        round: u32,
        deadline: Duration,
    ) -> RoundVotes {
        let mut join_set = JoinSet::new();
        for agent in &self.agents {
            let agent = agent.clone();
            let proposal = proposal.clone();
            let memory_ctx = memory_ctx.to_string();
            join_set.spawn(async move {
                let role = agent.role.name().to_string();
                let result =
                    tokio::time::timeout(deadline, agent.evaluate(&proposal, &memory_ctx, round))
                        .await;
                match result {
                    Ok(Ok(vote)) => (role, Ok(vote)),
                    Ok(Err(error)) => (role, Err(error)),
                    Err(_) => (
                        role,
                        Err(ProviderError::Unavailable("round deadline exceeded".into())),
                    ),
                }
            });
        }

        let mut votes = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(vote))) => votes.push(vote),
                Ok((role, Err(error))) => failures.push((role, error)),
                Err(e) => warn!(error = %e, "agent task panicked"),
            }
        }
        // Stable ordering for deterministic round records
        votes.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        RoundVotes { votes, failures }
    }

    /// Weighted consensus: `S = sum(w_i * v_i) / sum(w_i)` with
    /// `w_i = reputation_i * confidence_i` and `v in {1.0, 0.0, 0.5}`.
    pub fn weighted_score(&self, votes: &[Vote]) -> f64 {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for vote in votes {
            let weight = self.reputation.get(&vote.agent_id) * vote.confidence;
            weighted_sum += weight * vote.decision.numeric();
            total_weight += weight;
        }
        if total_weight <= f64::EPSILON {
            return 0.0;
        }
        weighted_sum / total_weight
    }

    /// The Arbiter's vote in a round, for threshold tie-breaks.
    pub fn arbiter_vote(votes: &[Vote]) -> Option<VoteDecision> {
        votes
            .iter()
            .find(|v| v.agent_id == AgentRole::Arbiter.name())
            .map(|v| v.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProposalDomain;
    use crate::provider::MockProvider;
    use lib_governance::ProposalCategory;
    use uuid::Uuid;

    fn proposal() -> Proposal {
        Proposal::new(
            "Open the archive",
            "Publish the historical archive under an open license.",
            ProposalCategory::Routine,
            ProposalDomain::Education,
            "ab".repeat(32),
        )
    }

    fn council_with(provider: Arc<MockProvider>) -> Council {
        Council::standard(provider, MemoryDag::ephemeral()).unwrap()
    }

    fn vote_of(agent: &str, decision: VoteDecision, confidence: f64) -> Vote {
        Vote {
            agent_id: agent.to_string(),
            agent_pubkey: String::new(),
            proposal_id: Uuid::new_v4(),
            round: 1,
            decision,
            ulfr: crate::ulfr::UlfrScore::neutral(),
            confidence,
            reasoning: String::new(),
            concerns: vec![],
            recommendations: vec![],
            signature: None,
        }
    }

    #[tokio::test]
    async fn test_full_round_collects_six_votes() {
        let provider = Arc::new(MockProvider::new());
        let council = council_with(provider);
        let result = council
            .evaluate_round(&proposal(), "", 1, Duration::from_secs(5))
            .await;
        assert_eq!(result.votes.len(), 6);
        assert!(result.failures.is_empty());
        // sorted by agent id
        assert_eq!(result.votes[0].agent_id, "arbiter");
    }

    #[tokio::test]
    async fn test_failures_reduce_vote_count() {
        let provider = Arc::new(MockProvider::new());
        provider.script_failure("seeker", ProviderError::Unavailable("down".into()));
        provider.script_failure("healer", ProviderError::RateLimited);
        let council = council_with(provider);
        let result = council
            .evaluate_round(&proposal(), "", 1, Duration::from_secs(5))
            .await;
        assert_eq!(result.votes.len(), 4);
        assert_eq!(result.failures.len(), 2);
    }

    #[test]
    fn test_weighted_score_unanimous_approve() {
        let council = council_with(Arc::new(MockProvider::new()));
        let votes = vec![
            vote_of("seeker", VoteDecision::Approve, 0.9),
            vote_of("guardian", VoteDecision::Approve, 0.8),
            vote_of("arbiter", VoteDecision::Approve, 0.75),
        ];
        let score = council.weighted_score(&votes);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_split() {
        let council = council_with(Arc::new(MockProvider::new()));
        let votes = vec![
            vote_of("seeker", VoteDecision::Approve, 1.0),
            vote_of("guardian", VoteDecision::Reject, 1.0),
        ];
        // equal default reputations and confidences: (1 + 0) / 2
        let score = council.weighted_score(&votes);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_confidence_weighting() {
        let council = council_with(Arc::new(MockProvider::new()));
        let votes = vec![
            vote_of("seeker", VoteDecision::Approve, 0.9),
            vote_of("guardian", VoteDecision::Reject, 0.3),
        ];
        // (0.9*1 + 0.3*0) / 1.2 = 0.75
        let score = council.weighted_score(&votes);
        assert!((score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_reputation_alignment_update() {
        let council = council_with(Arc::new(MockProvider::new()));
        let params = GovernanceParams::default();
        let votes = vec![
            vote_of("seeker", VoteDecision::Approve, 1.0),
            vote_of("guardian", VoteDecision::Reject, 1.0),
            vote_of("creator", VoteDecision::Abstain, 1.0),
        ];
        // consensus approving (score > 0.5)
        council.reputation.update_on_terminal(&votes, 0.8, &params);
        assert!((council.reputation.get("seeker") - 0.52).abs() < 1e-9);
        assert!((council.reputation.get("guardian") - 0.45).abs() < 1e-9);
        // abstainer untouched
        assert!((council.reputation.get("creator") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reputation_clamped() {
        let council = council_with(Arc::new(MockProvider::new()));
        let params = GovernanceParams::default();
        let votes = vec![vote_of("guardian", VoteDecision::Reject, 1.0)];
        for _ in 0..20 {
            council.reputation.update_on_terminal(&votes, 0.9, &params);
        }
        assert!(council.reputation.get("guardian") >= 0.0);

        council.reputation.slash_to_zero("guardian");
        assert_eq!(council.reputation.get("guardian"), 0.0);
    }

    #[test]
    fn test_stake_release_and_slash() {
        let council = council_with(Arc::new(MockProvider::new()));
        let table = &council.reputation;

        // default reputation 0.5: can stake 0.3, not 0.3 more
        assert!(table.stake("seeker", 0.3));
        assert!(!table.stake("seeker", 0.3));
        assert!((table.staked("seeker") - 0.3).abs() < 1e-12);

        table.release_stake("seeker", 0.1);
        assert!((table.staked("seeker") - 0.2).abs() < 1e-12);

        // slashing burns total reputation, not just the lock
        let remaining = table.slash_stake("seeker", 0.2);
        assert!((remaining - 0.3).abs() < 1e-12);
        assert_eq!(table.staked("seeker"), 0.0);
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_agents() {
        struct SlowProvider;
        #[async_trait::async_trait]
        impl GenerativeCapability for SlowProvider {
            async fn generate(&self, _: &str, _: &str) -> Result<String, ProviderError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }
        let council = Council::standard(Arc::new(SlowProvider), MemoryDag::ephemeral()).unwrap();
        let result = council
            .evaluate_round(&proposal(), "", 1, Duration::from_millis(50))
            .await;
        assert!(result.votes.is_empty());
        assert_eq!(result.failures.len(), 6);
    }
}
