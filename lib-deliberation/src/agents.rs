//! The six cognitive agent roles.
//!
//! Each agent evaluates proposals from its own ethical perspective through
//! the generative capability and parses its own structured response. Parse
//! failures degrade the vote to abstain with zero confidence; they never
//! crash a round. The Mediator additionally synthesizes refined proposals.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use lib_crypto::NodeKeypair;

use crate::models::{Proposal, RoundResult, Vote, VoteDecision};
use crate::provider::{GenerativeCapability, ProviderError};
use crate::ulfr::UlfrScore;

/// Council roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Seeker,
    Healer,
    Guardian,
    Mediator,
    Creator,
    Arbiter,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Seeker,
        AgentRole::Healer,
        AgentRole::Guardian,
        AgentRole::Mediator,
        AgentRole::Creator,
        AgentRole::Arbiter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Seeker => "seeker",
            AgentRole::Healer => "healer",
            AgentRole::Guardian => "guardian",
            AgentRole::Mediator => "mediator",
            AgentRole::Creator => "creator",
            AgentRole::Arbiter => "arbiter",
        }
    }

    /// Role perspective, including the role's documented biases.
    fn perspective(&self) -> &'static str {
        match self {
            AgentRole::Seeker => {
                "You are the Seeker, focused on outcomes, evidence and aggregate welfare.\n\
                 You ask: what does the data say, and which option maximizes utility?\n\
                 Known biases: you may undervalue individual rights when the numbers look good,\n\
                 and you may overtrust incomplete evidence."
            }
            AgentRole::Healer => {
                "You are the Healer, focused on harm reduction and protection of the vulnerable.\n\
                 You ask: who could be hurt, and how do we prevent it?\n\
                 Known biases: you may be overly cautious and block net-positive action,\n\
                 and you may weigh visible harm over diffuse benefit."
            }
            AgentRole::Guardian => {
                "You are the Guardian, focused on rights, autonomy, dignity and due process.\n\
                 You ask: does this respect every affected party's rights?\n\
                 Known biases: you may treat principles as absolute when trade-offs are needed,\n\
                 and you may privilege procedure over outcome."
            }
            AgentRole::Mediator => {
                "You are the Mediator, focused on conflict resolution and synthesis.\n\
                 You look for the third way that transcends binary choices and ask:\n\
                 how can this conflict be resolved to satisfy all parties?\n\
                 Known biases: you may prioritize compromise over moral truth,\n\
                 and you may dilute strong but necessary positions."
            }
            AgentRole::Creator => {
                "You are the Creator, focused on generative alternatives and second-order effects.\n\
                 You ask: what option has nobody considered, and what precedent does this set?\n\
                 Known biases: you may favor novelty over proven solutions,\n\
                 and you may underestimate implementation cost."
            }
            AgentRole::Arbiter => {
                "You are the Arbiter, focused on consistency with precedent and final judgment.\n\
                 You break ties and ask: is this coherent with what we have decided before?\n\
                 Known biases: you may anchor on precedent past its usefulness,\n\
                 and you may be slow to accept genuinely new circumstances."
            }
        }
    }

    fn response_format() -> &'static str {
        "RESPONSE FORMAT:\n\
         Return only a valid JSON object, no text outside it:\n\
         {\n\
           \"vote\": \"APPROVE\" | \"REJECT\" | \"ABSTAIN\",\n\
           \"ulfr\": {\"U\": float, \"L\": float, \"F_penalty\": float, \"R_risk\": float},\n\
           \"confidence\": float,\n\
           \"reasoning\": \"string\",\n\
           \"concerns\": [\"string\"],\n\
           \"recommendations\": [\"string\"]\n\
         }\n\
         All floats are in [0.0, 1.0]."
    }

    pub fn system_prompt(&self) -> String {
        format!("{}\n\n{}", self.perspective(), Self::response_format())
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One member of the council.
pub struct CouncilAgent {
    pub role: AgentRole,
    keypair: NodeKeypair,
    provider: Arc<dyn GenerativeCapability>,
}

impl CouncilAgent {
    pub fn new(role: AgentRole, provider: Arc<dyn GenerativeCapability>) -> anyhow::Result<Self> {
        Ok(Self {
            role,
            keypair: NodeKeypair::generate()?,
            provider,
        })
    }

    pub fn pubkey(&self) -> String {
        self.keypair.node_id()
    }

    /// Evaluate a proposal from this role's perspective.
    ///
    /// Provider failures bubble up (the agent returns no vote and the round's
    /// quorum accounting sees the gap); parse failures degrade to a signed
    /// abstain.
    pub async fn evaluate(
        &self,
        proposal: &Proposal,
        memory_ctx: &str,
        round: u32,
    ) -> Result<Vote, ProviderError> {
        let prompt = format!(
            "Evaluate this proposal from your perspective.\n\n\
             TITLE: {}\nCATEGORY: {}\nDOMAIN: {:?}\nROUND: {}\n\n\
             DESCRIPTION:\n{}\n\n\
             DELIBERATION CONTEXT:\n{}\n\n\
             Provide your evaluation in the required JSON format.",
            proposal.title, proposal.category, proposal.domain, round, proposal.description, memory_ctx,
        );
        let response = self
            .provider
            .generate(&prompt, &self.role.system_prompt())
            .await?;

        let mut vote = match parse_evaluation(&response) {
            Some(parsed) => Vote {
                agent_id: self.role.name().to_string(),
                agent_pubkey: String::new(),
                proposal_id: proposal.id,
                round,
                decision: parsed.decision,
                ulfr: parsed.ulfr,
                confidence: parsed.confidence,
                reasoning: parsed.reasoning,
                concerns: parsed.concerns,
                recommendations: parsed.recommendations,
                signature: None,
            },
            None => {
                warn!(role = %self.role, "unparseable agent response, degrading to abstain");
                Vote {
                    agent_id: self.role.name().to_string(),
                    agent_pubkey: String::new(),
                    proposal_id: proposal.id,
                    round,
                    decision: VoteDecision::Abstain,
                    ulfr: UlfrScore::neutral(),
                    confidence: 0.0,
                    reasoning: "response could not be parsed".to_string(),
                    concerns: vec![],
                    recommendations: vec![],
                    signature: None,
                }
            }
        };
        vote.sign(&self.keypair);
        Ok(vote)
    }

    /// Mediator-only: synthesize a refined proposal description from the
    /// previous round's reasoning.
    pub async fn refine(
        &self,
        proposal: &Proposal,
        prior_round: &RoundResult,
    ) -> Result<String, ProviderError> {
        let mut feedback = String::new();
        for vote in &prior_round.votes {
            feedback.push_str(&format!(
                "ENTITY: {}\nVOTE: {:?}\nREASONING: {}\n",
                vote.agent_id, vote.decision, vote.reasoning
            ));
            if !vote.concerns.is_empty() {
                feedback.push_str(&format!("CONCERNS: {}\n", vote.concerns.join(", ")));
            }
            if !vote.recommendations.is_empty() {
                feedback.push_str(&format!("RECOMMENDATIONS: {}\n", vote.recommendations.join(", ")));
            }
            feedback.push('\n');
        }

        let prompt = format!(
            "Refine this proposal to address the concerns raised while keeping its intent.\n\n\
             ORIGINAL PROPOSAL:\nTitle: {}\nDescription: {}\n\n\
             FEEDBACK FROM ENTITIES:\n{}\n\
             TASK:\n\
             Write a refined description. Propose a concrete compromise, include specific\n\
             safeguards (human oversight, limited scope, reversible steps), and keep the core\n\
             objective. Return only the new description text.",
            proposal.title, proposal.description, feedback,
        );
        let system = "You are the Mediator. Synthesize feedback into a refined proposal \
                      description. Do NOT output JSON.";
        let refined = self.provider.generate(&prompt, system).await?;
        Ok(refined.trim().trim_start_matches("REFINED DESCRIPTION:").trim().to_string())
    }
}

struct ParsedEvaluation {
    decision: VoteDecision,
    ulfr: UlfrScore,
    confidence: f64,
    reasoning: String,
    concerns: Vec<String>,
    recommendations: Vec<String>,
}

/// Strip markdown fences and decode the evaluation schema.
fn parse_evaluation(response: &str) -> Option<ParsedEvaluation> {
    let cleaned = strip_fences(response);
    let value: Value = serde_json::from_str(cleaned.trim()).ok()?;
    let object = value.as_object()?;

    let decision = match object.get("vote")?.as_str()?.to_uppercase().as_str() {
        "APPROVE" => VoteDecision::Approve,
        "REJECT" => VoteDecision::Reject,
        _ => VoteDecision::Abstain,
    };

    // Accept the nested `ulfr` object or flat top-level dimensions.
    let dims = object.get("ulfr").and_then(Value::as_object).unwrap_or(object);
    let dim = |keys: &[&str]| -> f64 {
        keys.iter()
            .find_map(|k| dims.get(*k).and_then(Value::as_f64))
            .unwrap_or(0.5)
    };
    let ulfr = UlfrScore::clamped(
        dim(&["U", "utility"]),
        dim(&["L", "life"]),
        dim(&["F_penalty", "F", "fairness_penalty"]),
        dim(&["R_risk", "R", "rights_risk"]),
    );

    let strings = |key: &str| -> Vec<String> {
        object
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    };

    Some(ParsedEvaluation {
        decision,
        ulfr,
        confidence: object
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0),
        reasoning: object
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or("no reasoning provided")
            .to_string(),
        concerns: strings("concerns"),
        recommendations: strings("recommendations"),
    })
}

fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return &after[..end];
        }
        return after;
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use lib_governance::ProposalCategory;
    use crate::models::ProposalDomain;

    fn proposal() -> Proposal {
        Proposal::new(
            "Water rationing",
            "Introduce rationing during the drought.",
            ProposalCategory::Routine,
            ProposalDomain::Environment,
            "ab".repeat(32),
        )
    }

    #[tokio::test]
    async fn test_evaluate_parses_scripted_vote() {
        let provider = Arc::new(MockProvider::new());
        provider.script_vote("seeker", "approve", (0.9, 0.7, 0.1, 0.1), 0.9);
        let agent = CouncilAgent::new(AgentRole::Seeker, provider).unwrap();

        let vote = agent.evaluate(&proposal(), "", 1).await.unwrap();
        assert_eq!(vote.decision, VoteDecision::Approve);
        assert!((vote.ulfr.utility - 0.9).abs() < 1e-9);
        assert!((vote.confidence - 0.9).abs() < 1e-9);
        assert!(vote.verify());
    }

    #[tokio::test]
    async fn test_garbage_response_degrades_to_abstain() {
        let provider = Arc::new(MockProvider::new());
        provider.script_text("guardian", "I simply refuse to answer in JSON.");
        let agent = CouncilAgent::new(AgentRole::Guardian, provider).unwrap();

        let vote = agent.evaluate(&proposal(), "", 1).await.unwrap();
        assert_eq!(vote.decision, VoteDecision::Abstain);
        assert_eq!(vote.confidence, 0.0);
        assert!(vote.verify());
    }

    #[tokio::test]
    async fn test_fenced_json_is_accepted() {
        let provider = Arc::new(MockProvider::new());
        provider.script_text(
            "healer",
            "```json\n{\"vote\": \"REJECT\", \"ulfr\": {\"U\": 0.2, \"L\": 0.9, \"F_penalty\": 0.3, \"R_risk\": 0.6}, \"confidence\": 0.8, \"reasoning\": \"too risky\"}\n```",
        );
        let agent = CouncilAgent::new(AgentRole::Healer, provider).unwrap();
        let vote = agent.evaluate(&proposal(), "", 2).await.unwrap();
        assert_eq!(vote.decision, VoteDecision::Reject);
        assert!((vote.ulfr.rights_risk - 0.6).abs() < 1e-9);
        assert_eq!(vote.round, 2);
    }

    #[tokio::test]
    async fn test_provider_failure_bubbles_up() {
        let provider = Arc::new(MockProvider::new());
        provider.script_failure("creator", ProviderError::Unavailable("down".into()));
        let agent = CouncilAgent::new(AgentRole::Creator, provider).unwrap();
        assert!(agent.evaluate(&proposal(), "", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_mediator_refine_strips_prefix() {
        let provider = Arc::new(MockProvider::new());
        provider.script_text("mediator", "REFINED DESCRIPTION: Ration water with hardship exemptions.");
        let agent = CouncilAgent::new(AgentRole::Mediator, provider).unwrap();
        let prior = RoundResult {
            round_no: 1,
            votes: vec![],
            weighted_score: 0.4,
            sanity_score: 0.5,
            threshold: 0.5,
            threshold_min: 0.4,
            outcome: crate::models::RoundOutcome::Refined,
            refined_proposal_id: None,
        };
        let refined = agent.refine(&proposal(), &prior).await.unwrap();
        assert_eq!(refined, "Ration water with hardship exemptions.");
    }

    #[test]
    fn test_every_role_has_distinct_prompt() {
        let prompts: Vec<String> = AgentRole::ALL.iter().map(|r| r.system_prompt()).collect();
        for (i, a) in prompts.iter().enumerate() {
            for b in prompts.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
            assert!(a.contains("RESPONSE FORMAT"));
        }
    }
}
